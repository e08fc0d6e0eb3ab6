//! Half-open key intervals.

use crate::error::{StrataResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable half-open interval `[min, max)` over an ordered key type.
///
/// The invariant `min <= max` is checked on construction. An interval with
/// `min == max` is empty and contains no key.
///
/// Intervals order by `min`, then by `max`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval<K> {
    min: K,
    max: K,
}

impl<K: Ord + fmt::Debug> Interval<K> {
    /// Create a new interval, rejecting `min > max`.
    pub fn new(min: K, max: K) -> StrataResult<Self> {
        if min > max {
            return Err(ValidationError::InvertedInterval {
                min: format!("{:?}", min),
                max: format!("{:?}", max),
            }
            .into());
        }
        Ok(Self { min, max })
    }
}

impl<K: Ord> Interval<K> {
    /// Build from bounds already known to be ordered.
    pub(crate) fn from_ordered(min: K, max: K) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> &K {
        &self.min
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> &K {
        &self.max
    }

    /// True when `min == max`.
    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    /// True iff `min <= key < max`.
    pub fn contains(&self, key: &K) -> bool {
        &self.min <= key && key < &self.max
    }

    /// True if the two intervals share at least one key.
    pub fn overlaps(&self, other: &Interval<K>) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// True if the two intervals overlap or meet end-to-start, i.e. their
    /// union is a single interval.
    pub fn touches(&self, other: &Interval<K>) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// True if `other` lies entirely inside `self`.
    pub fn encloses(&self, other: &Interval<K>) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Decompose into `(min, max)`.
    pub fn into_bounds(self) -> (K, K) {
        (self.min, self.max)
    }
}

impl<K: Ord + Clone> Interval<K> {
    /// Union of two touching intervals, or `None` if there is a gap
    /// between them.
    pub fn merge(&self, other: &Interval<K>) -> Option<Interval<K>> {
        if !self.touches(other) {
            return None;
        }
        let min = if self.min <= other.min { &self.min } else { &other.min };
        let max = if self.max >= other.max { &self.max } else { &other.max };
        Some(Interval::from_ordered(min.clone(), max.clone()))
    }

    /// The keys shared by both intervals, if any.
    pub fn intersection(&self, other: &Interval<K>) -> Option<Interval<K>> {
        if !self.overlaps(other) {
            return None;
        }
        let min = if self.min >= other.min { &self.min } else { &other.min };
        let max = if self.max <= other.max { &self.max } else { &other.max };
        Some(Interval::from_ordered(min.clone(), max.clone()))
    }
}

impl<K: fmt::Display> fmt::Display for Interval<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}
