//! Fragment cache module

mod clock;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{CacheStats, CachedFragment, FragmentCache, MemoryCache};
