//! Range predicate handed to the backing store.
//!
//! A [`RangePredicate`] is a disjunction of half-open key intervals. Its
//! meaning is lexicographic membership, which [`RangePredicate::matches`]
//! tests directly and which agrees with the coverage mask.
//!
//! Fetchers that push the predicate down to a query engine read it as a
//! disjunction of per-column conjunctions through
//! [`RangePredicate::column_ranges`]:
//!
//! ```text
//! (c0 >= 2 AND c0 < 3) OR
//! (c0 > 'east' AND c0 < 'west') OR (c0 = 'west' AND c1 < 0) OR (c0 = 'east' AND c1 >= 0)
//! ```
//!
//! A lexicographic bound on a composite key is not a single conjunction, so
//! one interval may expand into several. The expansion is exact for a table
//! whose row keys all have the requested number of columns, including
//! bounds shorter or longer than that, such as [`Key::successor`] bounds
//! left behind by point coverage.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use strata_core::{Datum, Key, KeyInterval};

/// Bound on one key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRange {
    /// Zero-based key column index.
    pub column: usize,
    pub lower: Bound<Datum>,
    pub upper: Bound<Datum>,
}

impl ColumnRange {
    /// `c = value`.
    pub fn equal(column: usize, value: Datum) -> Self {
        Self {
            column,
            lower: Included(value.clone()),
            upper: Included(value),
        }
    }

    /// Only a lower bound.
    pub fn above(column: usize, lower: Bound<Datum>) -> Self {
        Self {
            column,
            lower,
            upper: Unbounded,
        }
    }

    /// Only an upper bound.
    pub fn below(column: usize, upper: Bound<Datum>) -> Self {
        Self {
            column,
            lower: Unbounded,
            upper,
        }
    }

    /// True if `value` satisfies both bounds.
    pub fn contains(&self, value: &Datum) -> bool {
        let above = match &self.lower {
            Included(lower) => value >= lower,
            Excluded(lower) => value > lower,
            Unbounded => true,
        };
        let below = match &self.upper {
            Included(upper) => value <= upper,
            Excluded(upper) => value < upper,
            Unbounded => true,
        };
        above && below
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Included(lower), Included(upper)) => lower > upper,
            (Included(lower) | Excluded(lower), Included(upper) | Excluded(upper)) => lower >= upper,
            _ => false,
        }
    }

    /// Narrow to the intersection with `other` (same column).
    fn tighten(&mut self, other: ColumnRange) {
        let ColumnRange { lower, upper, .. } = other;
        if lower_is_tighter(&lower, &self.lower) {
            self.lower = lower;
        }
        if upper_is_tighter(&upper, &self.upper) {
            self.upper = upper;
        }
    }
}

fn lower_is_tighter(candidate: &Bound<Datum>, current: &Bound<Datum>) -> bool {
    match (candidate, current) {
        (Unbounded, _) => false,
        (_, Unbounded) => true,
        (Excluded(c), Included(p)) => c >= p,
        (Included(c), Included(p)) | (Included(c), Excluded(p)) | (Excluded(c), Excluded(p)) => c > p,
    }
}

fn upper_is_tighter(candidate: &Bound<Datum>, current: &Bound<Datum>) -> bool {
    match (candidate, current) {
        (Unbounded, _) => false,
        (_, Unbounded) => true,
        (Excluded(c), Included(p)) => c <= p,
        (Included(c), Included(p)) | (Included(c), Excluded(p)) | (Excluded(c), Excluded(p)) => c < p,
    }
}

impl fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.column;
        if let (Included(lower), Included(upper)) = (&self.lower, &self.upper) {
            if lower == upper {
                return write!(f, "c{c} = {lower}");
            }
        }
        let lower = match &self.lower {
            Included(v) => Some(format!("c{c} >= {v}")),
            Excluded(v) => Some(format!("c{c} > {v}")),
            Unbounded => None,
        };
        let upper = match &self.upper {
            Included(v) => Some(format!("c{c} <= {v}")),
            Excluded(v) => Some(format!("c{c} < {v}")),
            Unbounded => None,
        };
        match (lower, upper) {
            (Some(lower), Some(upper)) => write!(f, "{lower} AND {upper}"),
            (Some(bound), None) | (None, Some(bound)) => write!(f, "{bound}"),
            (None, None) => write!(f, "TRUE"),
        }
    }
}

/// Conjunction of column bounds, at most one per column, sorted by column.
pub type Conjunction = Vec<ColumnRange>;

/// Disjunction of key intervals fetched in one backing-store round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePredicate {
    /// Sorted, non-empty intervals.
    intervals: Vec<KeyInterval>,
}

impl RangePredicate {
    /// Build a predicate over `intervals`. Empty intervals are dropped.
    pub fn new(intervals: Vec<KeyInterval>) -> Self {
        let mut intervals: Vec<KeyInterval> = intervals
            .into_iter()
            .filter(|interval| !interval.is_empty())
            .collect();
        intervals.sort();
        Self { intervals }
    }

    /// The intervals, in key order.
    pub fn intervals(&self) -> &[KeyInterval] {
        &self.intervals
    }

    /// Consume the predicate and return its intervals.
    pub fn into_intervals(self) -> Vec<KeyInterval> {
        self.intervals
    }

    /// Number of disjuncts.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// A predicate without disjuncts matches nothing.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// True if `key` lies in any interval.
    pub fn matches(&self, key: &Key) -> bool {
        self.intervals.iter().any(|interval| interval.contains(key))
    }

    /// The predicate as a disjunction of per-column conjunctions, for row
    /// keys of exactly `width` columns.
    ///
    /// A row key of that width satisfies some returned conjunction iff
    /// [`matches`](Self::matches) accepts it. Conjunctions that no value
    /// can satisfy are left out, so an empty result matches nothing, while
    /// an empty conjunction matches every row.
    pub fn column_ranges(&self, width: usize) -> Vec<Conjunction> {
        self.intervals
            .iter()
            .flat_map(|interval| expand(interval, width))
            .collect()
    }
}

/// Lexicographic `start <= key < end` as per-column conjunctions.
fn expand(interval: &KeyInterval, width: usize) -> Vec<Conjunction> {
    let lower = at_or_after(interval.start(), width);
    let upper = before(interval.end(), width);

    let mut conjunctions: Vec<Conjunction> = Vec::new();
    for l in &lower {
        for u in &upper {
            if let Some(conjunction) = merge(l.iter().chain(u).cloned()) {
                if !conjunctions.contains(&conjunction) {
                    conjunctions.push(conjunction);
                }
            }
        }
    }
    conjunctions
}

fn equal_prefix(columns: &[Datum], len: usize) -> Conjunction {
    columns[..len]
        .iter()
        .enumerate()
        .map(|(column, value)| ColumnRange::equal(column, value.clone()))
        .collect()
}

/// Row keys of `width` columns sorting at or after `bound`.
fn at_or_after(bound: &Key, width: usize) -> Vec<Conjunction> {
    let columns = bound.columns();
    if columns.is_empty() {
        return vec![Vec::new()];
    }
    // A row key equal to a longer bound's prefix sorts before it
    let (steps, inclusive_last) = if columns.len() <= width {
        (columns.len(), true)
    } else {
        (width, false)
    };
    (0..steps)
        .map(|i| {
            let mut conjunction = equal_prefix(columns, i);
            let value = columns[i].clone();
            let lower = if inclusive_last && i + 1 == steps {
                Included(value)
            } else {
                Excluded(value)
            };
            conjunction.push(ColumnRange::above(i, lower));
            conjunction
        })
        .collect()
}

/// Row keys of `width` columns sorting strictly before `bound`.
fn before(bound: &Key, width: usize) -> Vec<Conjunction> {
    let columns = bound.columns();
    if columns.len() > width && width == 0 {
        return vec![Vec::new()];
    }
    let (steps, inclusive_last) = if columns.len() <= width {
        (columns.len(), false)
    } else {
        (width, true)
    };
    (0..steps)
        .map(|i| {
            let mut conjunction = equal_prefix(columns, i);
            let value = columns[i].clone();
            let upper = if inclusive_last && i + 1 == steps {
                Included(value)
            } else {
                Excluded(value)
            };
            conjunction.push(ColumnRange::below(i, upper));
            conjunction
        })
        .collect()
}

/// Intersect bounds per column. `None` if some column becomes empty.
fn merge(ranges: impl IntoIterator<Item = ColumnRange>) -> Option<Conjunction> {
    let mut merged: BTreeMap<usize, ColumnRange> = BTreeMap::new();
    for range in ranges {
        match merged.entry(range.column) {
            Entry::Vacant(slot) => {
                slot.insert(range);
            }
            Entry::Occupied(mut slot) => slot.get_mut().tighten(range),
        }
    }
    if merged.values().any(ColumnRange::is_empty) {
        return None;
    }
    Some(merged.into_values().collect())
}

/// Renders each interval at the narrower of its two bound widths. Use
/// [`RangePredicate::column_ranges`] with the table's key width when the
/// text is meant for a query engine.
impl fmt::Display for RangePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let disjuncts: Vec<Conjunction> = self
            .intervals
            .iter()
            .flat_map(|interval| {
                let width = interval.start().len().min(interval.end().len()).max(1);
                expand(interval, width)
            })
            .collect();
        if disjuncts.is_empty() {
            return write!(f, "FALSE");
        }
        for (i, conjunction) in disjuncts.iter().enumerate() {
            if i > 0 {
                write!(f, " OR ")?;
            }
            write!(f, "(")?;
            if conjunction.is_empty() {
                write!(f, "TRUE")?;
            }
            for (j, range) in conjunction.iter().enumerate() {
                if j > 0 {
                    write!(f, " AND ")?;
                }
                write!(f, "{range}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
