//! STRATA Storage - Range Cache over an Ordered Row Store
//!
//! Serves key-range reads from memory, going to the backing store only for
//! the parts of a range that have never been read. The backing store and
//! the notification sinks are supplied by the caller through the traits
//! in [`cache::traits`].

pub mod cache;

pub use cache::{
    CacheConfig, CacheMap, CacheStats, CacheableRow, ColumnRange, Conjunction, InMemoryChangeJournal,
    InMemorySinkRegistry, NotificationSink, ObservedRow, RangeCache, RangePredicate, RangeView,
    RowCursor, RowFetcher, SinkRegistry, Watermark,
};
