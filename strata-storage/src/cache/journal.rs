//! Change journal sink and in-memory sink registry.
//!
//! The change journal records what the range cache has told its sinks: one
//! watermark step per authoritative range notification, plus every
//! observed row. Watermarks represent a point in that history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use strata_core::{Key, KeyInterval, StorageError, StrataResult};
use tokio::sync::RwLock as AsyncRwLock;

use super::traits::{CacheableRow, NotificationSink, SinkRegistry};

/// Position in a table's range-publication history.
///
/// Every `on_select_range` a journal receives moves the table's watermark
/// one step forward, so comparing two watermarks tells whether coverage
/// was published in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    /// Range publications seen for the table so far.
    pub sequence: u64,
    /// Wall-clock time the position was read.
    pub read_at: DateTime<Utc>,
}

impl Watermark {
    pub fn at(sequence: u64) -> Self {
        Self {
            sequence,
            read_at: Utc::now(),
        }
    }

    /// Position before any publication.
    pub fn origin() -> Self {
        Self {
            sequence: 0,
            read_at: DateTime::UNIX_EPOCH,
        }
    }

    /// True if `self` saw a publication that `other` did not.
    pub fn is_after(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }

    /// True if `self` saw every publication `other` saw.
    pub fn includes(&self, other: &Watermark) -> bool {
        self.sequence >= other.sequence
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::origin()
    }
}

/// A row notification as seen by the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRow {
    pub key: Key,
    pub single_row: bool,
}

#[derive(Debug, Default)]
struct TableLog {
    published: u64,
    entries: Vec<Publication>,
}

#[derive(Debug, Clone)]
struct Publication {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    covered: Vec<KeyInterval>,
}

/// Sink that journals what the range cache publishes.
///
/// Register it for every table whose coverage should be auditable. Row
/// observations are kept in arrival order; range publications are kept per
/// table and numbered by [`Watermark`] sequence.
#[derive(Debug, Default)]
pub struct InMemoryChangeJournal {
    tables: AsyncRwLock<HashMap<String, TableLog>>,
    observed: AsyncRwLock<Vec<ObservedRow>>,
}

impl InMemoryChangeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest watermark of `table`; the origin if nothing was published.
    pub async fn current_watermark(&self, table: &str) -> Watermark {
        let tables = self.tables.read().await;
        Watermark::at(tables.get(table).map_or(0, |log| log.published))
    }

    /// True if `table` published ranges after `since`.
    pub async fn changes_since(&self, table: &str, since: &Watermark) -> bool {
        self.tables
            .read()
            .await
            .get(table)
            .is_some_and(|log| log.published > since.sequence)
    }

    /// Every interval `table` published after `since`, in publication
    /// order. Pruned publications are not returned.
    pub async fn ranges_since(&self, table: &str, since: &Watermark) -> Vec<KeyInterval> {
        let tables = self.tables.read().await;
        let Some(log) = tables.get(table) else {
            return Vec::new();
        };
        log.entries
            .iter()
            .filter(|entry| entry.sequence > since.sequence)
            .flat_map(|entry| entry.covered.iter().cloned())
            .collect()
    }

    /// Keys of all observed rows, in notification order.
    pub async fn observed_keys(&self) -> Vec<Key> {
        let observed = self.observed.read().await;
        observed.iter().map(|row| row.key.clone()).collect()
    }

    pub async fn observed_rows(&self) -> Vec<ObservedRow> {
        self.observed.read().await.clone()
    }

    /// Forget publications of `table` recorded before `cutoff`. Sequence
    /// numbers are untouched, so watermarks never move backwards. Returns
    /// the number of publications dropped.
    pub async fn prune(&self, table: &str, cutoff: DateTime<Utc>) -> usize {
        let mut tables = self.tables.write().await;
        let Some(log) = tables.get_mut(table) else {
            return 0;
        };
        let kept_from = log
            .entries
            .iter()
            .position(|entry| entry.recorded_at >= cutoff)
            .unwrap_or(log.entries.len());
        log.entries.drain(..kept_from).count()
    }
}

#[async_trait]
impl<R: CacheableRow> NotificationSink<R> for InMemoryChangeJournal {
    async fn on_select(&self, row: &R, single_row: bool) -> StrataResult<()> {
        let key = row.row_key();
        self.observed.write().await.push(ObservedRow { key, single_row });
        Ok(())
    }

    async fn on_select_range(&self, table: &str, covered: &[KeyInterval]) -> StrataResult<()> {
        let mut tables = self.tables.write().await;
        let log = tables.entry(table.to_owned()).or_default();
        log.published += 1;
        let sequence = log.published;
        log.entries.push(Publication {
            sequence,
            recorded_at: Utc::now(),
            covered: covered.to_vec(),
        });
        Ok(())
    }
}

/// Table-to-sinks registry held in memory.
pub struct InMemorySinkRegistry<R: CacheableRow> {
    sinks: RwLock<HashMap<String, Vec<Arc<dyn NotificationSink<R>>>>>,
}

impl<R: CacheableRow> Default for InMemorySinkRegistry<R> {
    fn default() -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: CacheableRow> InMemorySinkRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sink` to the sinks of `table`.
    pub fn register(&self, table: impl Into<String>, sink: Arc<dyn NotificationSink<R>>) -> StrataResult<()> {
        let mut sinks = self.sinks.write().map_err(|_| StorageError::LockPoisoned)?;
        sinks.entry(table.into()).or_default().push(sink);
        Ok(())
    }

    /// Remove every sink of `table`, returning how many were removed.
    pub fn unregister_all(&self, table: &str) -> StrataResult<usize> {
        let mut sinks = self.sinks.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(sinks.remove(table).map(|s| s.len()).unwrap_or(0))
    }
}

impl<R: CacheableRow> SinkRegistry<R> for InMemorySinkRegistry<R> {
    fn sinks_for(&self, table: &str) -> StrataResult<Vec<Arc<dyn NotificationSink<R>>>> {
        let sinks = self.sinks.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(sinks.get(table).cloned().unwrap_or_default())
    }
}
