//! ESI Cache Core
//!
//! This crate provides the include resolution engine for ESI Cache,
//! including the tag scanner, fragment cache, host allow-list and the
//! diagnostic log sink.

pub mod allowed_hosts;
pub mod cache;
pub mod cache_control;
pub mod error;
pub mod logger;
pub mod processor;
pub mod scanner;

pub use allowed_hosts::{AllowAll, AllowedHosts, HostAllowList, HostMatcher, PATTERN_PREFIX};
pub use cache::{
    CacheStats, CachedFragment, Clock, FragmentCache, ManualClock, MemoryCache, SystemClock,
};
pub use cache_control::cache_ttl_millis;
pub use error::{CoreError, IncludeError};
pub use logger::{LogSink, Logger, TracingSink, WriterSink};
pub use processor::{
    DEFAULT_MAX_DEPTH, ErrorHook, EsiProcessor, EsiProcessorBuilder, ProcessOptions,
};
pub use scanner::{IncludeTag, find_include_tags};
