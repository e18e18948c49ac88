//! Include resolution engine
//!
//! [`EsiProcessor`] repeatedly scans a document for include tags, resolves
//! every tag of a pass concurrently and splices the results back in place.
//! Passes continue while the rebuilt document still contains include tags;
//! once the depth limit is exceeded the remaining tags are dropped.

use futures::future::join_all;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use esi_proxy::{
    DEFAULT_USER_AGENT, DataProvider, DataProviderConfig, HttpClient, HttpClientConfig,
    ProxyError, ReqwestClient, RequestOptions,
};

use crate::allowed_hosts::{AllowedHosts, HostAllowList, HostMatcher};
use crate::cache::{FragmentCache, MemoryCache};
use crate::cache_control::cache_ttl_millis;
use crate::error::{CoreError, IncludeError};
use crate::logger::{LogSink, Logger};
use crate::scanner::{self, IncludeTag};

/// Default number of nested include passes
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Per-call options: forwarded headers and base URL override
pub type ProcessOptions = RequestOptions;

/// Hook invoked when an include cannot be resolved.
///
/// Receives the fully-qualified URL and the failure; `Some` replaces the tag
/// with the returned markup, `None` with nothing.
pub type ErrorHook = Arc<dyn Fn(&str, &IncludeError) -> Option<String> + Send + Sync>;

enum CacheSetting {
    Memory,
    Disabled,
    Custom(Arc<dyn FragmentCache>),
}

/// Builder for [`EsiProcessor`]
pub struct EsiProcessorBuilder {
    base_url: Option<String>,
    max_depth: u32,
    allowed_hosts: Option<Vec<HostMatcher>>,
    host_entries: Vec<String>,
    custom_allowed_hosts: Option<Arc<dyn AllowedHosts>>,
    cache: CacheSetting,
    http_client: Option<Arc<dyn HttpClient>>,
    http_config: HttpClientConfig,
    data_provider: Option<Arc<DataProvider>>,
    on_error: Option<ErrorHook>,
    log_to: Option<Arc<dyn LogSink>>,
    user_agent: Option<String>,
}

impl Default for EsiProcessorBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            max_depth: DEFAULT_MAX_DEPTH,
            allowed_hosts: None,
            host_entries: Vec::new(),
            custom_allowed_hosts: None,
            cache: CacheSetting::Memory,
            http_client: None,
            http_config: HttpClientConfig::default(),
            data_provider: None,
            on_error: None,
            log_to: None,
            user_agent: None,
        }
    }
}

impl EsiProcessorBuilder {
    /// Base URL for relative include paths; its origin is always allowed
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Number of nested passes before remaining includes are dropped
    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Allow-list entries
    pub fn allowed_hosts(mut self, hosts: impl IntoIterator<Item = HostMatcher>) -> Self {
        self.allowed_hosts
            .get_or_insert_with(Vec::new)
            .extend(hosts);
        self
    }

    /// Allow-list entries in configuration form (`regex:<expr>` or an origin).
    ///
    /// Entries are parsed by [`build`](Self::build).
    pub fn allowed_host_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_entries.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Replace the allow-list policy entirely
    pub fn custom_allowed_hosts(mut self, hosts: Arc<dyn AllowedHosts>) -> Self {
        self.custom_allowed_hosts = Some(hosts);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn FragmentCache>) -> Self {
        self.cache = CacheSetting::Custom(cache);
        self
    }

    /// Fetch every include on every pass
    pub fn disable_cache(mut self) -> Self {
        self.cache = CacheSetting::Disabled;
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Settings for the default reqwest client
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Use an existing data provider (its pending-fetch registry is shared)
    pub fn data_provider(mut self, provider: Arc<DataProvider>) -> Self {
        self.data_provider = Some(provider);
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &IncludeError) -> Option<String> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Sink for user-facing diagnostics
    pub fn log_to(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_to = Some(sink);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the processor, validating the configuration
    pub fn build(self) -> Result<EsiProcessor, CoreError> {
        let logger = Logger::new(self.log_to);

        let base_url = self
            .base_url
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        if let Some(base) = &base_url {
            Url::parse(base).map_err(|e| CoreError::InvalidBaseUrl(format!("{}: {}", base, e)))?;
        }

        let data_provider = match self.data_provider {
            Some(provider) => provider,
            None => {
                let user_agent = self
                    .user_agent
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
                let client = match self.http_client {
                    Some(client) => client,
                    None => {
                        let config = HttpClientConfig {
                            user_agent: user_agent.clone(),
                            ..self.http_config
                        };
                        Arc::new(ReqwestClient::new(config)?) as Arc<dyn HttpClient>
                    }
                };
                let config = DataProviderConfig {
                    base_url: base_url.clone(),
                    user_agent,
                };
                Arc::new(DataProvider::new(config, client)?)
            }
        };

        let base_url =
            base_url.or_else(|| data_provider.base_url().map(|u| u.as_str().to_string()));

        let allowed_hosts = match self.custom_allowed_hosts {
            Some(hosts) => hosts,
            None => {
                let mut hosts = self.allowed_hosts;
                if !self.host_entries.is_empty() {
                    let parsed = self
                        .host_entries
                        .iter()
                        .map(|entry| HostMatcher::parse(entry))
                        .collect::<Result<Vec<_>, _>>()?;
                    hosts.get_or_insert_with(Vec::new).extend(parsed);
                }
                HostAllowList::build(hosts, base_url.as_deref(), &logger)
            }
        };

        let cache: Option<Arc<dyn FragmentCache>> = match self.cache {
            CacheSetting::Memory => Some(Arc::new(MemoryCache::new())),
            CacheSetting::Disabled => None,
            CacheSetting::Custom(cache) => Some(cache),
        };

        debug!(
            "ESI processor ready (base: {:?}, max depth: {}, cache: {})",
            base_url,
            self.max_depth,
            cache.is_some()
        );

        Ok(EsiProcessor {
            inner: Arc::new(Inner {
                max_depth: self.max_depth,
                allowed_hosts,
                cache,
                data_provider,
                on_error: self.on_error,
                logger,
            }),
        })
    }
}

struct Inner {
    max_depth: u32,
    allowed_hosts: Arc<dyn AllowedHosts>,
    cache: Option<Arc<dyn FragmentCache>>,
    data_provider: Arc<DataProvider>,
    on_error: Option<ErrorHook>,
    logger: Logger,
}

impl Inner {
    /// Live fetch; successful bodies are stored with their Cache-Control TTL
    async fn fetch_and_store(&self, url: &str, options: &ProcessOptions) -> Result<String, ProxyError> {
        let fragment = self.data_provider.get(url, options).await?;

        if let Some(cache) = &self.cache {
            let ttl = cache_ttl_millis(fragment.cache_control());
            if let Err(e) = cache.set(url, fragment.body.clone(), ttl).await {
                warn!("Failed to cache fragment {}: {}", url, e);
            }
        }

        Ok(fragment.body)
    }
}

/// Edge Side Includes processor.
///
/// Cloning is cheap; clones share the cache and the pending-fetch registry.
#[derive(Clone)]
pub struct EsiProcessor {
    inner: Arc<Inner>,
}

impl EsiProcessor {
    pub fn builder() -> EsiProcessorBuilder {
        EsiProcessorBuilder::default()
    }

    /// Resolve every include in `html`.
    ///
    /// Never fails: unresolvable includes become `alt` content, error hook
    /// output or the empty string.
    pub async fn process(&self, html: &str, options: &ProcessOptions) -> String {
        let mut html = html.to_string();
        let mut depth = 0u32;

        loop {
            html = scanner::strip_remove_blocks(&html);

            let tags = scanner::find_include_tags(&html);
            if tags.is_empty() {
                break;
            }

            if depth > self.inner.max_depth {
                debug!(
                    "Maximum include depth {} exceeded, dropping {} include(s)",
                    self.inner.max_depth,
                    tags.len()
                );
                let empty = vec![String::new(); tags.len()];
                html = scanner::splice(&html, &tags, &empty);
                break;
            }

            let resolved = join_all(tags.iter().map(|tag| self.resolve_tag(tag, options))).await;
            html = scanner::splice(&html, &tags, &resolved);
            depth += 1;
        }

        metrics::counter!("esi_pages_processed_total").increment(1);
        html
    }

    /// Include tags of `html` as the scanner sees them
    pub fn find_include_tags(&self, html: &str) -> Vec<IncludeTag> {
        scanner::find_include_tags(html)
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// Provider used for fragment fetches
    pub fn data_provider(&self) -> &Arc<DataProvider> {
        &self.inner.data_provider
    }

    /// Deepest include nesting that is still resolved
    pub fn max_depth(&self) -> u32 {
        self.inner.max_depth
    }

    /// Run the error hook for a failed include and return the replacement
    pub fn handle_error(&self, url: &str, error: &IncludeError) -> String {
        metrics::counter!("esi_fragment_errors_total").increment(1);
        warn!("Failed to include {}: {}", url, error);

        let Some(hook) = &self.inner.on_error else {
            return String::new();
        };

        match panic::catch_unwind(AssertUnwindSafe(|| hook(url, error))) {
            Ok(Some(replacement)) => replacement,
            Ok(None) => String::new(),
            Err(_) => {
                warn!("Error hook panicked while handling {}", url);
                String::new()
            }
        }
    }

    async fn resolve_tag(&self, tag: &IncludeTag, options: &ProcessOptions) -> String {
        let primary = match tag.src.as_deref() {
            Some(src) => self.resolve_source(src, options).await,
            None => Err((String::new(), IncludeError::MissingSource)),
        };

        let (url, error) = match primary {
            Ok(body) => return body,
            Err(failure) => failure,
        };

        let Some(alt) = tag.alt.as_deref() else {
            return self.handle_error(&url, &error);
        };

        debug!("Include {} failed ({}), trying alt {}", url, error, alt);
        match self.resolve_source(alt, options).await {
            Ok(body) => body,
            Err((url, error)) => self.handle_error(&url, &error),
        }
    }

    async fn resolve_source(
        &self,
        src: &str,
        options: &ProcessOptions,
    ) -> Result<String, (String, IncludeError)> {
        let url = self
            .inner
            .data_provider
            .to_fully_qualified_url(src, options.base_url.as_deref());

        if !self.inner.allowed_hosts.includes(&url) {
            return Err((url.clone(), IncludeError::Blocked { url }));
        }

        if let Some(cache) = &self.inner.cache {
            match cache.get(&url).await {
                Ok(cached) => {
                    metrics::counter!("esi_cache_hits_total").increment(1);
                    if cached.expired {
                        debug!("Serving stale fragment {}", url);
                        self.spawn_refresh(url, options.clone());
                    } else {
                        debug!("Cache hit for {}", url);
                    }
                    return Ok(cached.value);
                }
                Err(CoreError::CacheMiss) => {
                    metrics::counter!("esi_cache_misses_total").increment(1);
                    debug!("Cache miss for {}", url);
                }
                Err(e) => warn!("Cache lookup for {} failed: {}", url, e),
            }
        }

        match self.inner.fetch_and_store(&url, options).await {
            Ok(body) => Ok(body),
            Err(e) => Err((url, IncludeError::from(e))),
        }
    }

    /// Re-fetch a stale entry in the background; the stale value stays on failure
    fn spawn_refresh(&self, url: String, options: ProcessOptions) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping refresh of {}", url);
            return;
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            match inner.fetch_and_store(&url, &options).await {
                Ok(_) => debug!("Refreshed stale fragment {}", url),
                Err(e) => warn!("Refresh of {} failed, keeping stale value: {}", url, e),
            }
        });
    }
}

impl std::fmt::Debug for EsiProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsiProcessor")
            .field("max_depth", &self.inner.max_depth)
            .field("cache", &self.inner.cache.is_some())
            .field("logger", &self.inner.logger)
            .finish()
    }
}
