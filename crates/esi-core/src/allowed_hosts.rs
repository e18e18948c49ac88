//! Host allow-list for include targets
//!
//! Every include URL is checked against the allow-list before it is fetched.
//! Comparison happens on origins (`scheme://host[:port]`), so paths and query
//! strings never influence the decision.

use regex::Regex;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::error::CoreError;
use crate::logger::Logger;

/// Prefix marking a configured host entry as a regular expression
pub const PATTERN_PREFIX: &str = "regex:";

const INSECURE_DEFAULT_WARNING: &str = "ESI warning: No allowedHosts and baseUrl specified. \
    In some cases this may impair your security.\n\
    Every include target will be fetched regardless of its host.";

/// Security predicate over absolute include URLs
pub trait AllowedHosts: Send + Sync {
    fn includes(&self, url: &str) -> bool;
}

/// One allow-list entry
#[derive(Debug, Clone)]
pub enum HostMatcher {
    /// Exact origin, e.g. `https://cdn.example.com`
    Origin(String),
    /// Regular expression tested against the candidate origin
    Pattern(Regex),
}

impl HostMatcher {
    /// Literal origin entry; the value is normalized to origin form
    pub fn origin(value: &str) -> Self {
        let origin = to_origin(value);
        if origin.is_empty() {
            HostMatcher::Origin(value.to_string())
        } else {
            HostMatcher::Origin(origin)
        }
    }

    /// Regular expression entry
    pub fn pattern(expr: &str) -> Result<Self, CoreError> {
        Regex::new(expr)
            .map(HostMatcher::Pattern)
            .map_err(|source| CoreError::InvalidHostPattern {
                pattern: expr.to_string(),
                source,
            })
    }

    /// Parse a configured entry: `regex:<expr>` or a literal origin
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.strip_prefix(PATTERN_PREFIX) {
            Some(expr) => Self::pattern(expr),
            None => Ok(Self::origin(value)),
        }
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            HostMatcher::Origin(allowed) => allowed == origin,
            HostMatcher::Pattern(re) => re.is_match(origin),
        }
    }
}

/// Accepts every URL; used when nothing restricts the include targets
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AllowedHosts for AllowAll {
    fn includes(&self, _url: &str) -> bool {
        true
    }
}

/// Origin allow-list
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<HostMatcher>,
}

impl HostAllowList {
    pub fn new(hosts: Vec<HostMatcher>) -> Self {
        Self { hosts }
    }

    /// Build the policy for a processor.
    ///
    /// With neither an explicit list nor a base URL every host is allowed and
    /// a warning goes to `logger`. Otherwise the base URL's origin is added to
    /// the explicit entries.
    pub fn build(
        allowed_hosts: Option<Vec<HostMatcher>>,
        base_url: Option<&str>,
        logger: &Logger,
    ) -> Arc<dyn AllowedHosts> {
        let base_url = base_url.map(str::trim).filter(|b| !b.is_empty());

        if allowed_hosts.is_none() && base_url.is_none() {
            warn!("No allowed hosts or base URL configured, all include hosts are permitted");
            logger.write(INSECURE_DEFAULT_WARNING);
            return Arc::new(AllowAll);
        }

        let mut hosts = allowed_hosts.unwrap_or_default();
        if let Some(base) = base_url {
            hosts.push(HostMatcher::origin(base));
        }

        Arc::new(Self::new(hosts))
    }
}

impl AllowedHosts for HostAllowList {
    fn includes(&self, url: &str) -> bool {
        let origin = to_origin(url);
        self.hosts.iter().any(|host| host.matches(&origin))
    }
}

/// Origin form of `url` (`scheme://host[:port]`); empty when it has no host.
///
/// Default ports are dropped by the URL parser, so `http://h:80` and
/// `http://h` share an origin.
pub fn to_origin(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };

    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", parsed.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", parsed.scheme(), host),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogSink;
    use parking_lot::Mutex;

    struct Collect(Mutex<Vec<String>>);

    impl LogSink for Collect {
        fn write(&self, message: &str) {
            self.0.lock().push(message.to_string());
        }
    }

    fn origins(values: &[&str]) -> Option<Vec<HostMatcher>> {
        Some(values.iter().map(|v| HostMatcher::origin(v)).collect())
    }

    #[test]
    fn test_warns_when_hosts_cannot_be_determined() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let logger = Logger::new(Some(sink.clone()));

        HostAllowList::build(None, None, &logger);

        let logs = sink.0.lock();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("No allowedHosts"));
    }

    #[test]
    fn test_approves_everything_without_configuration() {
        let hosts = HostAllowList::build(None, None, &Logger::default());
        assert!(hosts.includes("anything"));
        assert!(hosts.includes("http://thishost/x"));
    }

    #[test]
    fn test_base_url_is_allowed_by_default() {
        let hosts = HostAllowList::build(None, Some("http://localhost"), &Logger::default());
        assert!(hosts.includes("http://localhost/whatever"));
        assert!(!hosts.includes("anything"));
    }

    #[test]
    fn test_port_and_scheme_matter() {
        let hosts = HostAllowList::build(None, Some("http://localhost"), &Logger::default());
        assert!(!hosts.includes("https://localhost"));
        assert!(!hosts.includes("http://localhost:8080"));
    }

    #[test]
    fn test_literal_origins() {
        let hosts = HostAllowList::build(
            origins(&["https://localhost", "http://localhost:8080"]),
            None,
            &Logger::default(),
        );
        assert!(hosts.includes("https://localhost"));
        assert!(hosts.includes("http://localhost:8080/path?q=1"));
        assert!(!hosts.includes("http://localhost"));
    }

    #[test]
    fn test_base_url_added_to_explicit_list() {
        let hosts = HostAllowList::build(
            origins(&["http://other"]),
            Some("http://localhost:3000/app/"),
            &Logger::default(),
        );
        assert!(hosts.includes("http://other/fragment"));
        assert!(hosts.includes("http://localhost:3000/header"));
        assert!(!hosts.includes("http://thishost"));
    }

    #[test]
    fn test_regular_expressions() {
        let hosts = HostAllowList::build(
            Some(vec![HostMatcher::pattern(r"^http(s)?://localhost$").unwrap()]),
            None,
            &Logger::default(),
        );
        assert!(hosts.includes("https://localhost"));
        assert!(hosts.includes("http://localhost/x"));
        assert!(!hosts.includes("http://localhost:8080"));
    }

    #[test]
    fn test_parse_entries() {
        assert!(matches!(
            HostMatcher::parse("regex:^https://.*$").unwrap(),
            HostMatcher::Pattern(_)
        ));
        match HostMatcher::parse("HTTP://Example.com:443/path").unwrap() {
            HostMatcher::Origin(origin) => assert_eq!(origin, "http://example.com:443"),
            other => panic!("unexpected matcher: {:?}", other),
        }
        assert!(matches!(
            HostMatcher::parse("regex:("),
            Err(CoreError::InvalidHostPattern { .. })
        ));
    }

    #[test]
    fn test_to_origin() {
        assert_eq!(to_origin("http://localhost:1234/a/b?c"), "http://localhost:1234");
        assert_eq!(to_origin("https://example.com:443/"), "https://example.com");
        assert_eq!(to_origin("anything"), "");
    }
}
