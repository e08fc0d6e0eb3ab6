//! STRATA Core - Keys, Intervals and Coverage Masks
//!
//! Pure data structures shared by the cache layer. All other crates depend
//! on this. Nothing here performs I/O.

pub mod error;
pub mod interval;
pub mod interval_set;
pub mod key;

pub use error::{ConfigError, StorageError, StrataError, StrataResult, ValidationError};
pub use interval::Interval;
pub use interval_set::IntervalSet;
pub use key::{Datum, Key};

/// Interval over composite row keys.
pub type KeyInterval = Interval<Key>;

/// Coverage mask over composite row keys.
pub type KeyMask = IntervalSet<Key>;

/// Build a key interval `[from, to)` from anything convertible to [`Key`].
pub fn key_interval(from: impl Into<Key>, to: impl Into<Key>) -> StrataResult<KeyInterval> {
    Interval::new(from.into(), to.into())
}
