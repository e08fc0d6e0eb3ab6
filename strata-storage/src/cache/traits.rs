//! Collaborator traits and the cacheable row marker.
//!
//! The range cache never talks to a database or an event bus directly.
//! It is handed a [`RowFetcher`] for the backing store and a
//! [`SinkRegistry`] that resolves the [`NotificationSink`]s of its table.

use async_trait::async_trait;
use std::sync::Arc;
use strata_core::{Key, KeyInterval, StrataResult};

use super::predicate::RangePredicate;

/// Marker trait for row types that can live in the range cache.
///
/// # Implementation Requirements
///
/// - `row_key()` must be a pure function of the row
/// - Key ordering must agree with the backing store's ordering of the
///   same columns
/// - All keys of a table have the same number of columns, and each
///   column holds a single `Datum` variant (or `Null`)
/// - Implementations must be `Send + Sync + 'static` for async use
pub trait CacheableRow: Clone + Send + Sync + 'static {
    /// Extract the composite key that addresses this row.
    fn row_key(&self) -> Key;
}

/// Cursor over the rows returned by a range fetch.
///
/// Each item may fail independently, e.g. when a network read breaks
/// mid-stream.
pub type RowCursor<R> = Box<dyn Iterator<Item = StrataResult<R>> + Send>;

/// Backing-store range fetch.
///
/// Given a disjunction of per-interval key ranges, returns every stored
/// row whose key matches. The cache issues at most one call per `select`.
#[async_trait]
pub trait RowFetcher<R: CacheableRow>: Send + Sync {
    /// Fetch all rows of `table` matching `predicate`.
    async fn fetch(&self, table: &str, predicate: &RangePredicate) -> StrataResult<RowCursor<R>>;
}

/// Receiver of cache population events for one table.
#[async_trait]
pub trait NotificationSink<R: CacheableRow>: Send + Sync {
    /// Called once for every fetched row, after it was merged into the
    /// store.
    async fn on_select(&self, row: &R, single_row: bool) -> StrataResult<()>;

    /// Called once per fetching `select`, after all rows were merged.
    ///
    /// From this point on, the absence of a row inside `covered` means the
    /// row does not exist.
    async fn on_select_range(&self, table: &str, covered: &[KeyInterval]) -> StrataResult<()>;
}

/// Resolves the notification sinks registered for a table.
pub trait SinkRegistry<R: CacheableRow>: Send + Sync {
    /// Sinks currently registered for `table`. An empty vector means the
    /// table cannot be range-cached right now.
    fn sinks_for(&self, table: &str) -> StrataResult<Vec<Arc<dyn NotificationSink<R>>>>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Selects answered entirely from the store.
    pub hits: u64,
    /// Selects that found at least one gap.
    pub misses: u64,
    /// Backing-store round trips issued.
    pub fetches: u64,
    /// Rows merged from fetches.
    pub rows_fetched: u64,
    /// Gap intervals filled by fetches.
    pub gaps_fetched: u64,
    /// Selects refused because no sink was registered.
    pub sink_unavailable: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
