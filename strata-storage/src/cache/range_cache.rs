//! Range-aware read-through cache.
//!
//! This module implements the core caching logic: diff a requested key
//! range against the coverage mask, fetch only the uncovered gaps in a
//! single backing-store round trip, merge the rows, publish the
//! notifications and extend the mask.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{ConfigError, Interval, Key, KeyInterval, StrataResult};
use tracing::{debug, error, warn};

use super::predicate::RangePredicate;
use super::store::CacheMap;
use super::traits::{CacheStats, CacheableRow, RowFetcher, SinkRegistry};
use super::view::RangeView;

/// Configuration for the range cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backing table the cache is bound to.
    pub table: String,
    /// Whether sinks receive one `on_select` call per fetched row.
    /// Range notifications are always sent.
    pub notify_rows: bool,
    /// Whether each backing-store fetch logs its full predicate.
    pub log_fetches: bool,
}

impl CacheConfig {
    /// Create a config for `table` with default options.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            notify_rows: true,
            log_fetches: false,
        }
    }

    /// Enable or disable per-row notifications.
    pub fn with_row_notifications(mut self, enabled: bool) -> Self {
        self.notify_rows = enabled;
        self
    }

    /// Enable or disable predicate logging.
    pub fn with_fetch_logging(mut self, enabled: bool) -> Self {
        self.log_fetches = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StrataResult<()> {
        if self.table.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "table".to_string(),
            }
            .into());
        }
        if self.table.trim() != self.table {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: self.table.clone(),
                reason: "must not have surrounding whitespace".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    rows_fetched: AtomicU64,
    gaps_fetched: AtomicU64,
    sink_unavailable: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            gaps_fetched: self.gaps_fetched.load(Ordering::Relaxed),
            sink_unavailable: self.sink_unavailable.load(Ordering::Relaxed),
        }
    }
}

/// Range-aware read-through cache bound to one backing table.
///
/// # Type Parameters
///
/// - `R`: The cached row type
/// - `F`: The backing-store fetcher used to fill gaps
/// - `S`: The registry resolving the table's notification sinks
///
/// # Concurrency
///
/// Share it behind an `Arc` and call [`select`](Self::select) from any
/// number of tasks. Gap detection and mask extension are not one atomic
/// step: two callers may fetch overlapping gaps, and because mask union
/// is idempotent and commutative and store writes are last-write-wins,
/// both converge on the same state. No lock is held across the fetch.
///
/// An [`invalidate`](Self::invalidate) that lands while a select is
/// fetching wins: the select still returns its view, but the gaps it
/// fetched are not marked covered, so the next select fetches them again.
///
/// # Example
///
/// ```ignore
/// let cache = RangeCache::new(CacheConfig::new("orders"), fetcher, registry)?;
///
/// match cache.select(0, 100).await? {
///     Some(view) => println!("{} rows", view.len()),
///     None => { /* no sink registered yet: query the store directly */ }
/// }
/// ```
pub struct RangeCache<R, F, S>
where
    R: CacheableRow,
    F: RowFetcher<R>,
    S: SinkRegistry<R>,
{
    config: CacheConfig,
    map: CacheMap<R>,
    fetcher: Arc<F>,
    sinks: Arc<S>,
    stats: StatsCounters,
}

impl<R, F, S> RangeCache<R, F, S>
where
    R: CacheableRow,
    F: RowFetcher<R>,
    S: SinkRegistry<R>,
{
    /// Create an empty cache bound to `config.table`.
    pub fn new(config: CacheConfig, fetcher: Arc<F>, sinks: Arc<S>) -> StrataResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            map: CacheMap::new(),
            fetcher,
            sinks,
            stats: StatsCounters::default(),
        })
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the backing-store fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Get a reference to the sink registry.
    pub fn sinks(&self) -> &S {
        &self.sinks
    }

    /// The underlying store and mask.
    pub fn map(&self) -> &CacheMap<R> {
        &self.map
    }

    /// Read the rows in `[from, to)`, fetching whatever the mask does not
    /// cover yet.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(view))`: a live view of the range. An empty view means
    ///   the backing store has no rows there.
    /// - `Ok(None)`: a fetch was needed but no notification sink is
    ///   registered for the table. Nothing was fetched; fall back to a
    ///   direct query.
    /// - `Err(_)`: the bounds are inverted, or the fetch, the cursor or a
    ///   sink failed. The failed gaps stay uncovered.
    pub async fn select(
        &self,
        from: impl Into<Key>,
        to: impl Into<Key>,
    ) -> StrataResult<Option<RangeView<R>>> {
        let query = Interval::new(from.into(), to.into())?;
        let table = self.config.table.as_str();

        let epoch = self.map.epoch();
        let gaps = self.map.difference(&query)?;
        if gaps.is_empty() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(table, range = %query, "range served from cache");
            return Ok(Some(self.map.view(query, Vec::new())));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let sinks = self.sinks.sinks_for(table)?;
        if sinks.is_empty() {
            self.stats.sink_unavailable.fetch_add(1, Ordering::Relaxed);
            warn!(table, range = %query, "no notification sink registered, range cache unavailable");
            return Ok(None);
        }

        let predicate = RangePredicate::new(gaps);
        if self.config.log_fetches {
            debug!(table, gaps = predicate.len(), %predicate, "fetching uncovered ranges");
        } else {
            debug!(table, gaps = predicate.len(), range = %query, "fetching uncovered ranges");
        }

        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let cursor = match self.fetcher.fetch(table, &predicate).await {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(table, error = %e, "range fetch failed");
                return Err(e);
            }
        };

        let mut rows: u64 = 0;
        for item in cursor {
            let row = match item {
                Ok(row) => row,
                Err(e) => {
                    error!(table, error = %e, rows, "row cursor failed, gaps stay uncovered");
                    return Err(e);
                }
            };
            self.map.put(row.row_key(), row.clone())?;
            if self.config.notify_rows {
                for sink in &sinks {
                    sink.on_select(&row, true).await?;
                }
            }
            rows += 1;
        }

        for sink in &sinks {
            sink.on_select_range(table, predicate.intervals()).await?;
        }

        let fetched = predicate.into_intervals();
        if !self.map.cover_since(epoch, fetched.iter().cloned())? {
            debug!(table, range = %query, "range invalidated during fetch, coverage not extended");
        }

        self.stats.rows_fetched.fetch_add(rows, Ordering::Relaxed);
        self.stats
            .gaps_fetched
            .fetch_add(fetched.len() as u64, Ordering::Relaxed);
        debug!(table, rows, gaps = fetched.len(), "gaps merged into cache");

        Ok(Some(self.map.view(query, fetched)))
    }

    /// Write a single row known to be fresh, optionally covering its key so
    /// later selects over it need no fetch.
    pub fn put(&self, row: R, add_key_to_mask: bool) -> StrataResult<Option<R>> {
        self.map.put_with_coverage(row.row_key(), row, add_key_to_mask)
    }

    /// Row at `key` as currently cached. Never fetches.
    pub fn get(&self, key: &Key) -> StrataResult<Option<R>> {
        self.map.get(key)
    }

    /// True if `key` lies in a covered range.
    pub fn is_covered(&self, key: &Key) -> StrataResult<bool> {
        self.map.contains_covered(key)
    }

    /// Snapshot of the coalesced covered intervals.
    pub fn covered_intervals(&self) -> StrataResult<Vec<KeyInterval>> {
        self.map.covered_intervals()
    }

    /// Forget `[from, to)`: its coverage and its rows. The next select over
    /// it goes back to the backing store. Returns the number of rows
    /// dropped.
    pub fn invalidate(&self, from: impl Into<Key>, to: impl Into<Key>) -> StrataResult<usize> {
        let range = Interval::new(from.into(), to.into())?;
        let dropped = self.map.remove_range(&range)?;
        debug!(table = %self.config.table, range = %range, dropped, "range invalidated");
        Ok(dropped)
    }

    /// Forget every row and all coverage.
    pub fn invalidate_all(&self) -> StrataResult<()> {
        self.map.clear()?;
        debug!(table = %self.config.table, "cache cleared");
        Ok(())
    }

    /// Usage counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
