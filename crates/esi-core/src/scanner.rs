//! ESI markup scanner
//!
//! Finds `<esi:include>` tags in flat text and strips `<esi:remove>` blocks.
//! The scanner never fails: markup it cannot make sense of (an include that
//! is never closed, a tag name that merely starts with `esi:include`) is
//! left in the text as is.

use std::ops::Range;
use tracing::debug;

const INCLUDE_OPEN: &str = "<esi:include";
const INCLUDE_CLOSE: &str = "</esi:include>";
const REMOVE_OPEN: &str = "<esi:remove>";
const REMOVE_CLOSE: &str = "</esi:remove>";

/// An include tag found by a scan pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTag {
    /// Byte range of the whole tag, closing tag included
    pub span: Range<usize>,
    /// Tag text as it appears in the document
    pub raw: String,
    /// Entity-decoded `src` attribute
    pub src: Option<String>,
    /// Entity-decoded `alt` attribute
    pub alt: Option<String>,
    pub self_closing: bool,
}

struct OpenTag {
    end: usize,
    attributes: Vec<(String, Option<String>)>,
    self_closing: bool,
}

/// Every well-formed include tag in `html`, left to right
pub fn find_include_tags(html: &str) -> Vec<IncludeTag> {
    let mut tags = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = html[cursor..].find(INCLUDE_OPEN) {
        let start = cursor + offset;

        let Some(open) = parse_open_tag(html, start) else {
            cursor = start + INCLUDE_OPEN.len();
            continue;
        };

        let end = if open.self_closing {
            open.end
        } else {
            match html[open.end..].find(INCLUDE_CLOSE) {
                Some(offset) => open.end + offset + INCLUDE_CLOSE.len(),
                None => {
                    debug!("Ignoring unclosed esi:include at offset {}", start);
                    cursor = open.end;
                    continue;
                }
            }
        };

        tags.push(IncludeTag {
            span: start..end,
            raw: html[start..end].to_string(),
            src: attribute(&open.attributes, "src"),
            alt: attribute(&open.attributes, "alt"),
            self_closing: open.self_closing,
        });
        cursor = end;
    }

    tags
}

/// Drop every `<esi:remove>...</esi:remove>` block.
///
/// An opening `<esi:remove>` without a matching close is left untouched.
pub fn strip_remove_blocks(html: &str) -> String {
    let mut output = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(offset) = html[cursor..].find(REMOVE_OPEN) {
        let start = cursor + offset;
        let body_start = start + REMOVE_OPEN.len();

        match html[body_start..].find(REMOVE_CLOSE) {
            Some(close) => {
                output.push_str(&html[cursor..start]);
                cursor = body_start + close + REMOVE_CLOSE.len();
            }
            None => break,
        }
    }

    output.push_str(&html[cursor..]);
    output
}

/// Rebuild `html` with each tag's span replaced by its resolved content.
///
/// `tags` must be in document order, as returned by [`find_include_tags`].
pub fn splice(html: &str, tags: &[IncludeTag], replacements: &[String]) -> String {
    let mut output = String::with_capacity(html.len());
    let mut cursor = 0;

    for (tag, replacement) in tags.iter().zip(replacements) {
        output.push_str(&html[cursor..tag.span.start]);
        output.push_str(replacement);
        cursor = tag.span.end;
    }

    output.push_str(&html[cursor..]);
    output
}

fn attribute(attributes: &[(String, Option<String>)], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| v.as_deref())
        .filter(|v| !v.is_empty())
        .map(|v| html_escape::decode_html_entities(v).into_owned())
}

fn is_self_close(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos) == Some(&b'/') && bytes.get(pos + 1) == Some(&b'>')
}

/// Tokenize the opening tag starting at `start`.
///
/// Attribute values may be double-quoted, single-quoted or bare. A bare
/// value ends at whitespace or `>`, so a `/` right before `>` belongs to the
/// value; `/>` only closes the tag between attributes. Returns `None` when the tag name
/// continues past `esi:include` or the tag never ends.
fn parse_open_tag(html: &str, start: usize) -> Option<OpenTag> {
    let bytes = html.as_bytes();
    let mut pos = start + INCLUDE_OPEN.len();

    match bytes.get(pos) {
        Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {}
        _ => return None,
    }

    let mut attributes = Vec::new();

    loop {
        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }

        match *bytes.get(pos)? {
            b'>' => {
                return Some(OpenTag {
                    end: pos + 1,
                    attributes,
                    self_closing: false,
                });
            }
            b'/' if is_self_close(bytes, pos) => {
                return Some(OpenTag {
                    end: pos + 2,
                    attributes,
                    self_closing: true,
                });
            }
            b'/' => {
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while let Some(&b) = bytes.get(pos) {
            if b.is_ascii_whitespace() || b == b'=' || b == b'>' || is_self_close(bytes, pos) {
                break;
            }
            pos += 1;
        }
        let name = html[name_start..pos].to_ascii_lowercase();

        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }

        if bytes.get(pos) != Some(&b'=') {
            attributes.push((name, None));
            continue;
        }

        pos += 1;
        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }

        let value = match *bytes.get(pos)? {
            quote @ (b'"' | b'\'') => {
                let value_start = pos + 1;
                let len = html[value_start..].find(quote as char)?;
                pos = value_start + len + 1;
                &html[value_start..value_start + len]
            }
            _ => {
                let value_start = pos;
                while let Some(&b) = bytes.get(pos) {
                    if b.is_ascii_whitespace() || b == b'>' {
                        break;
                    }
                    pos += 1;
                }
                &html[value_start..pos]
            }
        };

        attributes.push((name, Some(value.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(html: &str) -> Vec<Option<String>> {
        find_include_tags(html).into_iter().map(|t| t.src).collect()
    }

    #[test]
    fn test_lists_include_tags() {
        let html = "<nav><esi:include src=\"/nav.html\"></esi:include><nav>\n        \
                    <main><esi:include src='/main.html'/></main>";

        let tags = find_include_tags(html);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].raw, "<esi:include src=\"/nav.html\"></esi:include>");
        assert_eq!(tags[1].raw, "<esi:include src='/main.html'/>");
        assert!(!tags[0].self_closing);
        assert!(tags[1].self_closing);
        assert_eq!(&html[tags[1].span.clone()], tags[1].raw);
    }

    #[test]
    fn test_quoting_styles() {
        assert_eq!(
            sources("<esi:include src=\"http://a/x\"></esi:include>"),
            vec![Some("http://a/x".to_string())]
        );
        assert_eq!(
            sources("<esi:include src='http://a/x'></esi:include>"),
            vec![Some("http://a/x".to_string())]
        );
        assert_eq!(
            sources("<esi:include src=http://a:1234></esi:include>"),
            vec![Some("http://a:1234".to_string())]
        );
        assert_eq!(
            sources("<esi:include src=http://a/x />"),
            vec![Some("http://a/x".to_string())]
        );
    }

    #[test]
    fn test_bare_value_keeps_trailing_slash() {
        let html = "<section><esi:include src=http://a/dir/></esi:include></section>";
        let tags = find_include_tags(html);

        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].src.as_deref(), Some("http://a/dir/"));
        assert!(!tags[0].self_closing);
        assert_eq!(
            splice(html, &tags, &["X".to_string()]),
            "<section>X</section>"
        );

        // Without a closing tag the include is left alone
        assert!(find_include_tags("<esi:include src=http://a/x/>").is_empty());
    }

    #[test]
    fn test_alt_attribute() {
        let tags = find_include_tags(
            "<esi:include src=\"http://a/missing\" alt=http://a/existing></esi:include>",
        );
        assert_eq!(tags[0].src.as_deref(), Some("http://a/missing"));
        assert_eq!(tags[0].alt.as_deref(), Some("http://a/existing"));

        let tags = find_include_tags("<esi:include alt='/b' src='/a' />");
        assert_eq!(tags[0].src.as_deref(), Some("/a"));
        assert_eq!(tags[0].alt.as_deref(), Some("/b"));
    }

    #[test]
    fn test_entities_are_decoded() {
        let tags = find_include_tags(
            "<esi:include src='http://a?foo=1&bar=2&amp;baz=3&#x00026;big=4&#38;bop=5'></esi:include>",
        );
        assert_eq!(
            tags[0].src.as_deref(),
            Some("http://a?foo=1&bar=2&baz=3&big=4&bop=5")
        );
    }

    #[test]
    fn test_explicit_close_is_not_confused_with_later_self_closing_tags() {
        let html = "<section><esi:include src=\"http://a\"></esi:include><img src=\"some-image\" /></section>";
        let tags = find_include_tags(html);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].raw, "<esi:include src=\"http://a\"></esi:include>");
    }

    #[test]
    fn test_quoted_values_may_contain_markup_characters() {
        let tags = find_include_tags("<esi:include src=\"/a?x=/>y\" />");
        assert_eq!(tags[0].src.as_deref(), Some("/a?x=/>y"));
        assert!(tags[0].self_closing);
    }

    #[test]
    fn test_typos_and_unclosed_tags_are_ignored() {
        assert!(find_include_tags("<esi:indclude src=\"http://a\"/>").is_empty());
        assert!(find_include_tags("<esi:includes src=\"http://a\"/>").is_empty());
        assert!(find_include_tags("<esi:include src=\"http://a\">").is_empty());
        assert!(find_include_tags("<esi:include src=\"http://a").is_empty());
    }

    #[test]
    fn test_missing_or_empty_src() {
        let tags = find_include_tags("<esi:include alt=\"/b\"/><esi:include src=\"\"/>");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].src, None);
        assert_eq!(tags[1].src, None);
    }

    #[test]
    fn test_strip_remove_blocks() {
        assert_eq!(
            strip_remove_blocks("a<esi:remove><a href=\"/x\">x</a></esi:remove>b<esi:remove></esi:remove>c"),
            "abc"
        );
        assert_eq!(strip_remove_blocks("a<esi:remove>b"), "a<esi:remove>b");
        assert_eq!(strip_remove_blocks("plain"), "plain");
    }

    #[test]
    fn test_splice_preserves_order() {
        let html = "<esi:include src=\"/h\"></esi:include>|<esi:include src=\"/f\"/>";
        let tags = find_include_tags(html);
        let spliced = splice(html, &tags, &["header".to_string(), "footer".to_string()]);
        assert_eq!(spliced, "header|footer");
    }
}
