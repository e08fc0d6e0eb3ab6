//! Range-aware read-through cache.
//!
//! A [`RangeCache`] keeps an ordered map of rows plus a coverage mask: the
//! set of key intervals for which the map is known to hold every row the
//! backing store has. A `select` over `[from, to)` subtracts the mask from
//! the request and fetches only the remaining gaps, all of them in one
//! backing-store call, before handing back a live view of the range.
//!
//! # Example
//!
//! ```ignore
//! let cache = RangeCache::new(CacheConfig::new("orders"), fetcher, registry)?;
//!
//! // Cold: fetches [0, 10)
//! cache.select(0, 10).await?;
//!
//! // Warm: no fetch
//! let view = cache.select(2, 4).await?.expect("sinks registered");
//! assert!(view.was_cache_hit());
//!
//! // Partially warm: fetches only [10, 20)
//! cache.select(5, 20).await?;
//! ```

pub mod journal;
pub mod predicate;
pub mod range_cache;
pub mod store;
pub mod traits;
pub mod view;

pub use journal::{InMemoryChangeJournal, InMemorySinkRegistry, ObservedRow, Watermark};
pub use predicate::{ColumnRange, Conjunction, RangePredicate};
pub use range_cache::{CacheConfig, RangeCache};
pub use store::CacheMap;
pub use traits::{CacheStats, CacheableRow, NotificationSink, RowCursor, RowFetcher, SinkRegistry};
pub use view::RangeView;
