//! Coverage mask: a coalescing set of disjoint half-open intervals.
//!
//! The set records which key ranges are fully represented in a cache.
//! Intervals are kept in a balanced ordered map from `min` to `max`, so
//! lookups and inserts are `O(log n)` plus the number of intervals
//! absorbed by a merge.
//!
//! # Invariant
//!
//! After every mutation the stored intervals are sorted, pairwise
//! disjoint, non-empty and non-adjacent (no interval's `max` equals the
//! next interval's `min`). Union is idempotent and commutative, so two
//! writers adding overlapping intervals in any order converge on the same
//! set.

use crate::interval::Interval;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// A minimal, sorted, disjoint set of half-open intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSet<K> {
    /// `min -> max` for each stored interval.
    ranges: BTreeMap<K, K>,
}

impl<K> Default for IntervalSet<K> {
    fn default() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> IntervalSet<K> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `[min, max)`, merging with every overlapping or adjacent
    /// interval. Empty and already-covered intervals leave the set
    /// unchanged.
    pub fn add(&mut self, interval: Interval<K>) {
        if interval.is_empty() {
            return;
        }
        let (mut min, mut max) = interval.into_bounds();

        if let Some((start, end)) = self.ranges.range::<K, _>(..=&min).next_back() {
            if *end >= min {
                if *end >= max {
                    return;
                }
                min = start.clone();
            }
        }

        let absorbed: Vec<K> = self
            .ranges
            .range::<K, _>(&min..=&max)
            .map(|(start, _)| start.clone())
            .collect();
        for start in absorbed {
            if let Some(end) = self.ranges.remove(&start) {
                if end > max {
                    max = end;
                }
            }
        }

        self.ranges.insert(min, max);
    }

    /// Batch form of [`add`](Self::add).
    ///
    /// The batch is sorted and pre-merged first, so each run of touching
    /// intervals costs one insertion.
    pub fn add_all<I>(&mut self, intervals: I)
    where
        I: IntoIterator<Item = Interval<K>>,
    {
        let mut batch: Vec<Interval<K>> = intervals
            .into_iter()
            .filter(|interval| !interval.is_empty())
            .collect();
        batch.sort();

        let mut merged: Vec<Interval<K>> = Vec::with_capacity(batch.len());
        for interval in batch {
            match merged.last_mut() {
                Some(last) => match last.merge(&interval) {
                    Some(union) => *last = union,
                    None => merged.push(interval),
                },
                None => merged.push(interval),
            }
        }

        for interval in merged {
            self.add(interval);
        }
    }

    /// True iff some interval contains `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.ranges
            .range::<K, _>(..=key)
            .next_back()
            .is_some_and(|(_, end)| key < end)
    }

    /// True iff every key of `query` is covered. Empty queries are always
    /// covered.
    pub fn covers(&self, query: &Interval<K>) -> bool {
        if query.is_empty() {
            return true;
        }
        self.ranges
            .range::<K, _>(..=query.start())
            .next_back()
            .is_some_and(|(_, end)| end >= query.end())
    }

    /// The ordered sub-intervals of `query` that no stored interval covers.
    ///
    /// The result is minimal: consecutive gaps are always separated by a
    /// covered, non-empty stretch, and no gap overlaps the set. An empty
    /// set yields `[query]`; an empty query yields `[]`.
    pub fn difference(&self, query: &Interval<K>) -> Vec<Interval<K>> {
        let mut gaps = Vec::new();
        if query.is_empty() {
            return gaps;
        }

        let mut cursor = query.start().clone();
        if let Some((_, end)) = self.ranges.range::<K, _>(..=&cursor).next_back() {
            if *end > cursor {
                cursor = end.clone();
            }
        }

        for (start, end) in self
            .ranges
            .range::<K, _>((Excluded(query.start()), Excluded(query.end())))
        {
            if cursor >= *query.end() {
                break;
            }
            if *start > cursor {
                gaps.push(Interval::from_ordered(cursor.clone(), start.clone()));
            }
            if *end > cursor {
                cursor = end.clone();
            }
        }

        if cursor < *query.end() {
            gaps.push(Interval::from_ordered(cursor, query.end().clone()));
        }
        gaps
    }

    /// Subtract `interval` from the set, splitting stored intervals that
    /// straddle its bounds.
    pub fn remove(&mut self, interval: &Interval<K>) {
        if interval.is_empty() {
            return;
        }
        let (lo, hi) = (interval.start(), interval.end());
        let mut reinsert: Vec<(K, K)> = Vec::new();

        let straddling = self
            .ranges
            .range::<K, _>((Unbounded, Excluded(lo)))
            .next_back()
            .filter(|(_, end)| *end > lo)
            .map(|(start, end)| (start.clone(), end.clone()));
        if let Some((start, end)) = straddling {
            self.ranges.remove(&start);
            if end > *hi {
                reinsert.push((hi.clone(), end));
            }
            reinsert.push((start, lo.clone()));
        }

        let inside: Vec<K> = self
            .ranges
            .range::<K, _>(lo..hi)
            .map(|(start, _)| start.clone())
            .collect();
        for start in inside {
            if let Some(end) = self.ranges.remove(&start) {
                if end > *hi {
                    reinsert.push((hi.clone(), end));
                }
            }
        }

        for (start, end) in reinsert {
            self.ranges.insert(start, end);
        }
    }

    /// Iterate the stored intervals in order.
    pub fn iter(&self) -> impl Iterator<Item = Interval<K>> + '_ {
        self.ranges
            .iter()
            .map(|(min, max)| Interval::from_ordered(min.clone(), max.clone()))
    }

    /// Snapshot of the stored intervals.
    pub fn intervals(&self) -> Vec<Interval<K>> {
        self.iter().collect()
    }

    /// Number of stored (coalesced) intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Forget all coverage.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

impl<K: Ord + Clone> FromIterator<Interval<K>> for IntervalSet<K> {
    fn from_iter<I: IntoIterator<Item = Interval<K>>>(iter: I) -> Self {
        let mut set = IntervalSet::new();
        set.add_all(iter);
        set
    }
}
