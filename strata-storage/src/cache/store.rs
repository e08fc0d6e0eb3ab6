//! Ordered key-value store with its coverage mask.
//!
//! [`CacheMap`] is the in-memory half of the range cache: a sorted map of
//! keys to rows plus the [`KeyMask`] recording which key ranges the map
//! holds authoritatively. Each is guarded by its own lock and no lock is
//! ever held across an `.await`.
//!
//! Removals bump an epoch while holding the mask lock. Coverage computed
//! before a fetch is only applied through [`CacheMap::cover_since`], which
//! refuses it once the epoch has moved, so a range dropped mid-fetch is
//! never marked covered again by the fetch that raced it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use strata_core::{Interval, Key, KeyInterval, KeyMask, StorageError, StrataResult};

use super::traits::CacheableRow;
use super::view::RangeView;

/// Sorted row map plus coverage mask.
#[derive(Debug)]
pub struct CacheMap<R> {
    /// Shared with every [`RangeView`] handed out.
    entries: Arc<RwLock<BTreeMap<Key, R>>>,
    mask: RwLock<KeyMask>,
    /// Bumped under the mask write lock by every removal.
    epoch: AtomicU64,
}

impl<R> Default for CacheMap<R> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            mask: RwLock::new(KeyMask::new()),
            epoch: AtomicU64::new(0),
        }
    }
}

impl<R: CacheableRow> CacheMap<R> {
    /// Create an empty map with an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the row at `key`. Coverage is unchanged.
    pub fn put(&self, key: Key, row: R) -> StrataResult<Option<R>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.insert(key, row))
    }

    /// Insert or overwrite the row at `key`, optionally marking exactly
    /// that key as covered.
    ///
    /// Used when a single row is known to be fresh, e.g. right after it was
    /// inserted, without going through a range fetch. The row is stored
    /// before the key is covered, so a concurrent reader never sees
    /// coverage without the row.
    ///
    /// If the key is removed between the write and the coverage update, the
    /// key is left uncovered.
    pub fn put_with_coverage(&self, key: Key, row: R, add_key_to_mask: bool) -> StrataResult<Option<R>> {
        let point = add_key_to_mask.then(|| Interval::new(key.clone(), key.successor()));
        let epoch = self.epoch();
        let previous = self.put(key, row)?;
        if let Some(point) = point {
            self.cover_since(epoch, std::iter::once(point?))?;
        }
        Ok(previous)
    }

    /// Row at `key`, regardless of coverage.
    pub fn get(&self, key: &Key) -> StrataResult<Option<R>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    /// Live view over `[from, to)`.
    pub fn sub_map(&self, from: Key, to: Key) -> StrataResult<RangeView<R>> {
        let bounds = Interval::new(from, to)?;
        Ok(self.view(bounds, Vec::new()))
    }

    pub(crate) fn view(&self, bounds: KeyInterval, fetched: Vec<KeyInterval>) -> RangeView<R> {
        RangeView::new(Arc::clone(&self.entries), bounds, fetched)
    }

    /// Sub-intervals of `query` not yet covered.
    pub fn difference(&self, query: &KeyInterval) -> StrataResult<Vec<KeyInterval>> {
        let mask = self.mask.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(mask.difference(query))
    }

    /// Mark `intervals` as covered.
    pub fn cover<I>(&self, intervals: I) -> StrataResult<()>
    where
        I: IntoIterator<Item = KeyInterval>,
    {
        let mut mask = self.mask.write().map_err(|_| StorageError::LockPoisoned)?;
        mask.add_all(intervals);
        Ok(())
    }

    /// Mark `intervals` as covered unless a removal happened after `epoch`
    /// was read. Returns whether the coverage was applied.
    pub fn cover_since<I>(&self, epoch: u64, intervals: I) -> StrataResult<bool>
    where
        I: IntoIterator<Item = KeyInterval>,
    {
        let mut mask = self.mask.write().map_err(|_| StorageError::LockPoisoned)?;
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Ok(false);
        }
        mask.add_all(intervals);
        Ok(true)
    }

    /// Removal counter. Read it before fetching rows whose range will later
    /// be passed to [`CacheMap::cover_since`].
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// True if `key` lies in a covered range.
    pub fn contains_covered(&self, key: &Key) -> StrataResult<bool> {
        let mask = self.mask.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(mask.contains(key))
    }

    /// Snapshot of the coalesced covered intervals.
    pub fn covered_intervals(&self) -> StrataResult<Vec<KeyInterval>> {
        let mask = self.mask.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(mask.intervals())
    }

    /// Forget coverage of `interval` and drop the rows inside it.
    ///
    /// Coverage is withdrawn first so that no reader sees a covered range
    /// with rows missing. The mask lock is held until the rows are gone.
    /// Returns the number of rows dropped.
    pub fn remove_range(&self, interval: &KeyInterval) -> StrataResult<usize> {
        let mut mask = self.mask.write().map_err(|_| StorageError::LockPoisoned)?;
        mask.remove(interval);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if interval.is_empty() {
            return Ok(0);
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let doomed: Vec<Key> = entries
            .range::<Key, _>(interval.start()..interval.end())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        drop(mask);
        Ok(doomed.len())
    }

    /// Drop every row and all coverage.
    pub fn clear(&self) -> StrataResult<()> {
        let mut mask = self.mask.write().map_err(|_| StorageError::LockPoisoned)?;
        mask.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        drop(mask);
        Ok(())
    }

    /// Number of stored rows.
    pub fn len(&self) -> StrataResult<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> StrataResult<bool> {
        Ok(self.len()? == 0)
    }
}
