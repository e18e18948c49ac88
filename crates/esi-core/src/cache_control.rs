//! Cache-Control header parsing

/// Time-to-live in milliseconds derived from a `Cache-Control` header.
///
/// `no-cache`, `no-store`, a missing header and anything without a valid
/// `max-age` all yield `0`.
pub fn cache_ttl_millis(header: Option<&str>) -> u64 {
    let Some(header) = header else {
        return 0;
    };

    let mut max_age = None;

    for directive in header.split(',') {
        let directive = directive.trim();
        let (name, value) = match directive.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (directive, None),
        };

        if name.eq_ignore_ascii_case("no-cache") || name.eq_ignore_ascii_case("no-store") {
            return 0;
        }

        if name.eq_ignore_ascii_case("max-age") {
            max_age = value.and_then(|v| v.parse::<u64>().ok());
        }
    }

    max_age.map(|secs| secs.saturating_mul(1000)).unwrap_or(0)
}
