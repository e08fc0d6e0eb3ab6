//! Composite row keys.
//!
//! A [`Key`] is an ordered tuple of [`Datum`] column values. Keys order
//! lexicographically column by column, and a strict prefix sorts before
//! any of its extensions. This matches how a backing store orders a
//! composite index over the same columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single column value.
///
/// Values of different variants order by variant rank, in declaration
/// order (`Null` lowest). Floats use IEEE total ordering so that `Eq` and
/// `Ord` agree.
///
/// Every key column must hold one variant (or `Null`) across all rows of
/// a table. Rank ordering puts `Int(i64::MAX)` below `Float(-inf)`, so a
/// column mixing `Int` and `Float` sorts differently here than in a store
/// that compares it numerically, and the coverage mask would describe the
/// wrong rows. Convert such columns to one variant before keying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Datum {
    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) => 2,
            Datum::Float(_) => 3,
            Datum::Text(_) => 4,
            Datum::Bytes(_) => 5,
            Datum::Timestamp(_) => 6,
            Datum::Uuid(_) => 7,
        }
    }

    /// Returns true if this is `Datum::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Float(a), Datum::Float(b)) => a.total_cmp(b),
            (Datum::Text(a), Datum::Text(b)) => a.cmp(b),
            (Datum::Bytes(a), Datum::Bytes(b)) => a.cmp(b),
            (Datum::Timestamp(a), Datum::Timestamp(b)) => a.cmp(b),
            (Datum::Uuid(a), Datum::Uuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Datum::Null => {}
            Datum::Bool(v) => v.hash(state),
            Datum::Int(v) => v.hash(state),
            // total_cmp equality is bit equality
            Datum::Float(v) => v.to_bits().hash(state),
            Datum::Text(v) => v.hash(state),
            Datum::Bytes(v) => v.hash(state),
            Datum::Timestamp(v) => v.hash(state),
            Datum::Uuid(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{}", v),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::Text(v) => write!(f, "'{}'", v),
            Datum::Bytes(v) => {
                write!(f, "x'")?;
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
            Datum::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Datum::Uuid(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v as i64)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Datum {
    fn from(v: DateTime<Utc>) -> Self {
        Datum::Timestamp(v)
    }
}

impl From<Uuid> for Datum {
    fn from(v: Uuid) -> Self {
        Datum::Uuid(v)
    }
}

/// Composite row key: an ordered tuple of column values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<Datum>);

impl Key {
    /// Create a key from its column values.
    pub fn new(columns: Vec<Datum>) -> Self {
        Self(columns)
    }

    /// The column values, in key order.
    pub fn columns(&self) -> &[Datum] {
        &self.0
    }

    /// Column `index`, if the key has that many columns.
    pub fn column(&self, index: usize) -> Option<&Datum> {
        self.0.get(index)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-column key, which sorts before every other key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The smallest key strictly greater than `self`.
    ///
    /// Any key between `self` and `self ++ [Null]` would have to extend
    /// `self` with a column below `Null`, and there is none. The half-open
    /// interval `[k, k.successor())` therefore covers exactly `k`.
    pub fn successor(&self) -> Key {
        let mut columns = Vec::with_capacity(self.0.len() + 1);
        columns.extend(self.0.iter().cloned());
        columns.push(Datum::Null);
        Key(columns)
    }

    /// Consume the key and return its columns.
    pub fn into_columns(self) -> Vec<Datum> {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, column) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", column)?;
        }
        write!(f, ")")
    }
}

impl From<Datum> for Key {
    fn from(v: Datum) -> Self {
        Key(vec![v])
    }
}

impl From<Vec<Datum>> for Key {
    fn from(v: Vec<Datum>) -> Self {
        Key(v)
    }
}

macro_rules! single_column_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(v: $ty) -> Self {
                    Key(vec![Datum::from(v)])
                }
            }
        )*
    };
}

single_column_key!(bool, i32, i64, f64, &str, String, Vec<u8>, DateTime<Utc>, Uuid);

impl<A, B> From<(A, B)> for Key
where
    A: Into<Datum>,
    B: Into<Datum>,
{
    fn from((a, b): (A, B)) -> Self {
        Key(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for Key
where
    A: Into<Datum>,
    B: Into<Datum>,
    C: Into<Datum>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Key(vec![a.into(), b.into(), c.into()])
    }
}
