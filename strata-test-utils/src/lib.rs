//! STRATA Test Utilities
//!
//! Centralized test infrastructure for the STRATA workspace:
//! - A mock backing table and a recording notification sink
//! - Proptest generators for keys and intervals
//! - Test fixtures for common scenarios
//! - Custom assertions for STRATA-specific validation

// Re-export core types for convenience
pub use strata_core::{
    key_interval, ConfigError, Datum, Interval, IntervalSet, Key, KeyInterval, KeyMask,
    StorageError, StrataError, StrataResult, ValidationError,
};
pub use strata_storage::{
    CacheConfig, CacheStats, CacheableRow, InMemoryChangeJournal, InMemorySinkRegistry,
    NotificationSink, RangeCache, RangePredicate, RangeView, RowCursor, RowFetcher, SinkRegistry,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to `debug` for the STRATA crates. Safe to
/// call from every test.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strata_storage=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// TEST ROWS
// ============================================================================

/// Simple keyed row used throughout the tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRow {
    pub key: Key,
    pub value: String,
}

impl TestRow {
    pub fn new(key: impl Into<Key>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl CacheableRow for TestRow {
    fn row_key(&self) -> Key {
        self.key.clone()
    }
}

// ============================================================================
// MOCK BACKING TABLE
// ============================================================================

/// In-memory backing table implementing [`RowFetcher`].
///
/// Records every predicate it is asked for and can be told to fail the
/// next fetch outright or to break the cursor after a number of rows.
pub struct MockTable<R: CacheableRow = TestRow> {
    table: String,
    rows: Mutex<BTreeMap<Key, R>>,
    predicates: Mutex<Vec<RangePredicate>>,
    fail_next_fetch: AtomicBool,
    fail_cursor_after: Mutex<Option<usize>>,
}

impl<R: CacheableRow> MockTable<R> {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Mutex::new(BTreeMap::new()),
            predicates: Mutex::new(Vec::new()),
            fail_next_fetch: AtomicBool::new(false),
            fail_cursor_after: Mutex::new(None),
        }
    }

    pub fn with_rows(table: impl Into<String>, rows: impl IntoIterator<Item = R>) -> Self {
        let mock = Self::new(table);
        for row in rows {
            mock.insert(row);
        }
        mock
    }

    /// Name of the table this mock serves.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert or replace a row in the backing table. The cache is not told.
    pub fn insert(&self, row: R) {
        self.rows
            .lock()
            .expect("mock table lock")
            .insert(row.row_key(), row);
    }

    /// Delete a row from the backing table. The cache is not told.
    pub fn delete(&self, key: &Key) -> Option<R> {
        self.rows.lock().expect("mock table lock").remove(key)
    }

    /// Number of fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.predicates.lock().expect("mock table lock").len()
    }

    /// Every predicate fetched so far, in call order.
    pub fn predicates(&self) -> Vec<RangePredicate> {
        self.predicates.lock().expect("mock table lock").clone()
    }

    /// Predicate of the most recent fetch.
    pub fn last_predicate(&self) -> Option<RangePredicate> {
        self.predicates.lock().expect("mock table lock").last().cloned()
    }

    /// Make the next fetch fail before returning a cursor.
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    /// Make the next cursor fail after yielding `rows` rows.
    pub fn fail_cursor_after(&self, rows: usize) {
        *self.fail_cursor_after.lock().expect("mock table lock") = Some(rows);
    }
}

/// Evaluate `predicate` the way a query engine would: through its
/// per-column form at the row key's width.
pub fn evaluate_column_ranges(predicate: &RangePredicate, key: &Key) -> bool {
    predicate.column_ranges(key.len()).iter().any(|conjunction| {
        conjunction
            .iter()
            .all(|range| key.column(range.column).is_some_and(|value| range.contains(value)))
    })
}

#[async_trait]
impl<R: CacheableRow> RowFetcher<R> for MockTable<R> {
    async fn fetch(&self, table: &str, predicate: &RangePredicate) -> StrataResult<RowCursor<R>> {
        self.predicates
            .lock()
            .expect("mock table lock")
            .push(predicate.clone());

        // Let concurrent selects interleave with this one.
        tokio::task::yield_now().await;

        if table != self.table {
            return Err(StorageError::FetchFailed {
                table: table.to_string(),
                reason: format!("mock serves only '{}'", self.table),
            }
            .into());
        }
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(StorageError::FetchFailed {
                table: table.to_string(),
                reason: "injected fetch failure".to_string(),
            }
            .into());
        }

        let mut items: Vec<StrataResult<R>> = self
            .rows
            .lock()
            .expect("mock table lock")
            .values()
            .filter(|row| evaluate_column_ranges(predicate, &row.row_key()))
            .cloned()
            .map(Ok)
            .collect();

        if let Some(after) = self.fail_cursor_after.lock().expect("mock table lock").take() {
            items.truncate(after);
            items.push(Err(StorageError::CursorFailed {
                table: table.to_string(),
                reason: "injected cursor failure".to_string(),
            }
            .into()));
        }

        Ok(Box::new(items.into_iter()))
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Notification sink that records every call it receives.
pub struct RecordingSink<R: CacheableRow = TestRow> {
    rows: Mutex<Vec<(R, bool)>>,
    ranges: Mutex<Vec<(String, Vec<KeyInterval>)>>,
    fail_ranges: AtomicBool,
    range_calls: AtomicUsize,
}

impl<R: CacheableRow> Default for RecordingSink<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            ranges: Mutex::new(Vec::new()),
            fail_ranges: AtomicBool::new(false),
            range_calls: AtomicUsize::new(0),
        }
    }
}

impl<R: CacheableRow> RecordingSink<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `on_select_range` call fail.
    pub fn fail_ranges(&self) {
        self.fail_ranges.store(true, Ordering::SeqCst);
    }

    /// Rows received through `on_select`, with their `single_row` flag.
    pub fn rows(&self) -> Vec<(R, bool)> {
        self.rows.lock().expect("sink lock").clone()
    }

    /// Successful `on_select_range` calls, in order.
    pub fn ranges(&self) -> Vec<(String, Vec<KeyInterval>)> {
        self.ranges.lock().expect("sink lock").clone()
    }

    /// All `on_select_range` calls, including failed ones.
    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: CacheableRow> NotificationSink<R> for RecordingSink<R> {
    async fn on_select(&self, row: &R, single_row: bool) -> StrataResult<()> {
        self.rows
            .lock()
            .expect("sink lock")
            .push((row.clone(), single_row));
        Ok(())
    }

    async fn on_select_range(&self, table: &str, covered: &[KeyInterval]) -> StrataResult<()> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ranges.load(Ordering::SeqCst) {
            return Err(StorageError::SinkFailed {
                table: table.to_string(),
                reason: "injected sink failure".to_string(),
            }
            .into());
        }
        self.ranges
            .lock()
            .expect("sink lock")
            .push((table.to_string(), covered.to_vec()));
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys, intervals and rows.

    use super::*;
    use proptest::prelude::*;

    /// Single-column integer key in `[0, domain)`.
    pub fn arb_int_key(domain: i64) -> impl Strategy<Value = Key> {
        (0..domain).prop_map(Key::from)
    }

    /// Two-column `(int, text)` key.
    pub fn arb_composite_key() -> impl Strategy<Value = Key> {
        (0i64..8, "[a-d]{0,2}").prop_map(|(id, region)| Key::from((id, region)))
    }

    /// Well-formed single-column interval inside `[0, domain]`.
    pub fn arb_interval(domain: i64) -> impl Strategy<Value = KeyInterval> {
        (0..=domain, 0..=domain).prop_map(|(a, b)| {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            key_interval(lo, hi).expect("ordered bounds")
        })
    }

    /// Up to `max` intervals inside `[0, domain]`.
    pub fn arb_intervals(domain: i64, max: usize) -> impl Strategy<Value = Vec<KeyInterval>> {
        prop::collection::vec(arb_interval(domain), 0..=max)
    }

    /// Row with an integer key in `[0, domain)`.
    pub fn arb_row(domain: i64) -> impl Strategy<Value = TestRow> {
        (0..domain, "[a-z]{1,6}").prop_map(|(id, value)| TestRow::new(id, value))
    }

    /// Backing-table contents: distinct keys in `[0, domain)`.
    pub fn arb_table_rows(domain: i64) -> impl Strategy<Value = Vec<TestRow>> {
        prop::collection::btree_set(0..domain, 0..=(domain as usize / 2))
            .prop_map(|ids| ids.into_iter().map(|id| TestRow::new(id, format!("r{id}"))).collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test data for common scenarios.

    use super::*;

    /// Table name used by the fixtures.
    pub const TABLE: &str = "measurements";

    /// Rows keyed 1, 2, 3, 5 and 8, each valued `v<key>`.
    pub fn sparse_rows() -> Vec<TestRow> {
        [1, 2, 3, 5, 8]
            .into_iter()
            .map(|id: i64| TestRow::new(id, format!("v{id}")))
            .collect()
    }

    /// Rows keyed `(region, id)` for a composite-key table.
    pub fn composite_rows() -> Vec<TestRow> {
        vec![
            TestRow::new(("east", 1), "e1"),
            TestRow::new(("east", 2), "e2"),
            TestRow::new(("north", 1), "n1"),
            TestRow::new(("west", 1), "w1"),
            TestRow::new(("west", 7), "w7"),
        ]
    }

    /// A cache over [`TABLE`] wired to its own mock and recording sink.
    pub struct Harness {
        pub cache: Arc<RangeCache<TestRow, MockTable, InMemorySinkRegistry<TestRow>>>,
        pub table: Arc<MockTable>,
        pub sink: Arc<RecordingSink>,
        pub registry: Arc<InMemorySinkRegistry<TestRow>>,
    }

    /// Cache over `rows` with one registered recording sink.
    pub fn harness(rows: Vec<TestRow>) -> Harness {
        harness_with_config(CacheConfig::new(TABLE), rows)
    }

    /// Cache over `rows` with a custom configuration.
    pub fn harness_with_config(config: CacheConfig, rows: Vec<TestRow>) -> Harness {
        let table = Arc::new(MockTable::with_rows(config.table.clone(), rows));
        let sink = Arc::new(RecordingSink::<TestRow>::new());
        let registry = Arc::new(InMemorySinkRegistry::<TestRow>::new());
        registry
            .register(config.table.clone(), sink.clone())
            .expect("fresh registry");
        let cache = RangeCache::new(config, table.clone(), registry.clone())
            .expect("valid fixture config");
        Harness {
            cache: Arc::new(cache),
            table,
            sink,
            registry,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for STRATA-specific validation.

    use super::*;

    /// Assert that a StrataResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StrataResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StrataResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a StrataResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a StrataResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a view holds exactly `expected` as `(key, value)` pairs,
    /// in order.
    #[track_caller]
    pub fn assert_view_values(view: &RangeView<TestRow>, expected: &[(Key, &str)]) {
        let actual: Vec<(Key, String)> = view
            .entries()
            .into_iter()
            .map(|(key, row)| (key, row.value))
            .collect();
        let expected: Vec<(Key, String)> = expected
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();
        assert_eq!(actual, expected, "view contents differ");
    }

    /// Assert that the mask is coalesced: sorted, non-empty, and with no
    /// two intervals touching or overlapping.
    #[track_caller]
    pub fn assert_coalesced(intervals: &[KeyInterval]) {
        for interval in intervals {
            assert!(!interval.is_empty(), "empty interval {interval} in mask");
        }
        for pair in intervals.windows(2) {
            assert!(
                pair[0].end() < pair[1].start(),
                "intervals {} and {} should have been merged",
                pair[0],
                pair[1]
            );
        }
    }
}
