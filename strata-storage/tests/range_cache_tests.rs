//! Integration tests for the range cache: gap detection, single round trip
//! per select, coverage, failure handling and invalidation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use strata_storage::{CacheConfig, InMemoryChangeJournal, NotificationSink, RangeCache, Watermark};
use strata_test_utils::assertions::{
    assert_coalesced, assert_config_error, assert_storage_error, assert_validation_error,
    assert_view_values,
};
use strata_test_utils::fixtures::{self, harness, harness_with_config, TABLE};
use strata_test_utils::{
    init_test_tracing, key_interval, InMemorySinkRegistry, Key, KeyInterval, MockTable,
    RecordingSink, StorageError, StrataError, StrataResult, TestRow,
};

fn k(id: i64) -> Key {
    Key::from(id)
}

// ============================================================================
// END-TO-END
// ============================================================================

#[tokio::test]
async fn test_end_to_end_cold_then_warm() {
    init_test_tracing();
    let h = harness(fixtures::sparse_rows());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(h.table.fetch_count(), 1);
    assert_eq!(
        h.table.last_predicate().unwrap().intervals(),
        &[key_interval(0, 10).unwrap()]
    );
    assert_view_values(
        &view,
        &[(k(1), "v1"), (k(2), "v2"), (k(3), "v3"), (k(5), "v5"), (k(8), "v8")],
    );
    assert!(view.get(&k(4)).is_none(), "absent rows are simply missing");

    let view = h.cache.select(2, 4).await.unwrap().expect("covered");
    assert_eq!(h.table.fetch_count(), 1, "warm select must not fetch");
    assert!(view.was_cache_hit());
    assert_view_values(&view, &[(k(2), "v2"), (k(3), "v3")]);

    let stats = h.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.rows_fetched, 5);
    assert_eq!(stats.gaps_fetched, 1);
}

#[tokio::test]
async fn test_two_gaps_fetched_in_one_round_trip() {
    init_test_tracing();
    let h = harness(fixtures::sparse_rows());

    h.cache.select(0, 2).await.unwrap();
    h.cache.select(3, 7).await.unwrap();
    h.cache.select(9, 10).await.unwrap();
    assert_eq!(h.table.fetch_count(), 3);

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(h.table.fetch_count(), 4, "exactly one more fetch");

    let predicate = h.table.last_predicate().unwrap();
    assert_eq!(
        predicate.intervals(),
        &[key_interval(2, 3).unwrap(), key_interval(7, 9).unwrap()]
    );
    for id in [2, 7, 8] {
        assert!(predicate.matches(&k(id)), "{id} should be fetched");
    }
    for id in [0, 1, 3, 5, 6, 9] {
        assert!(!predicate.matches(&k(id)), "{id} is already covered");
    }
    assert_eq!(predicate.to_string(), "(c0 >= 2 AND c0 < 3) OR (c0 >= 7 AND c0 < 9)");

    assert_eq!(view.fetched_gaps(), predicate.intervals());
    assert_eq!(view.keys(), vec![k(1), k(2), k(3), k(5), k(8)]);
}

#[tokio::test]
async fn test_coverage_after_select() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(3, 12).await.unwrap();
    h.cache.select(-4, 4).await.unwrap();

    for id in -4..12 {
        assert!(h.cache.is_covered(&k(id)).unwrap(), "{id} should be covered");
    }
    assert!(!h.cache.is_covered(&k(12)).unwrap());
    assert!(!h.cache.is_covered(&k(-5)).unwrap());

    let covered = h.cache.covered_intervals().unwrap();
    assert_coalesced(&covered);
    assert_eq!(covered, vec![key_interval(-4, 12).unwrap()]);
}

#[tokio::test]
async fn test_empty_result_is_not_none() {
    let h = harness(fixtures::sparse_rows());

    let view = h.cache.select(10, 20).await.unwrap().expect("sink registered");
    assert!(view.is_empty());
    assert!(!view.was_cache_hit());
    assert!(h.cache.is_covered(&k(15)).unwrap());

    let view = h.cache.select(12, 14).await.unwrap().expect("covered");
    assert!(view.is_empty());
    assert_eq!(h.table.fetch_count(), 1);
}

#[tokio::test]
async fn test_empty_and_inverted_ranges() {
    let h = harness(fixtures::sparse_rows());

    let view = h.cache.select(5, 5).await.unwrap().expect("nothing to fetch");
    assert!(view.is_empty());
    assert_eq!(h.table.fetch_count(), 0);

    assert_validation_error(&h.cache.select(9, 1).await);
    assert_eq!(h.table.fetch_count(), 0);
    assert!(h.cache.covered_intervals().unwrap().is_empty());
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[tokio::test]
async fn test_sinks_see_rows_then_range() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 4).await.unwrap();

    let rows = h.sink.rows();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, single_row)| *single_row));
    assert_eq!(
        rows.iter().map(|(row, _)| row.key.clone()).collect::<Vec<_>>(),
        vec![k(1), k(2), k(3)],
        "rows arrive in cursor order"
    );
    assert_eq!(
        h.sink.ranges(),
        vec![(TABLE.to_string(), vec![key_interval(0, 4).unwrap()])]
    );

    // Hits notify nobody
    h.cache.select(1, 3).await.unwrap();
    assert_eq!(h.sink.rows().len(), 3);
    assert_eq!(h.sink.range_calls(), 1);
}

#[tokio::test]
async fn test_row_notifications_disabled() {
    let h = harness_with_config(
        CacheConfig::new(TABLE).with_row_notifications(false),
        fixtures::sparse_rows(),
    );
    h.cache.select(0, 10).await.unwrap();

    assert!(h.sink.rows().is_empty());
    assert_eq!(h.sink.ranges().len(), 1);
}

#[tokio::test]
async fn test_change_journal_watermarks_follow_fetches() {
    let h = harness(fixtures::sparse_rows());
    let journal = Arc::new(InMemoryChangeJournal::new());
    h.registry.register(TABLE, journal.clone()).unwrap();

    let start = journal.current_watermark(TABLE).await;
    assert_eq!(start.sequence, 0);
    assert!(start.includes(&Watermark::origin()));

    h.cache.select(0, 5).await.unwrap();
    let after_first = journal.current_watermark(TABLE).await;
    assert!(after_first.is_after(&start));

    h.cache.select(1, 4).await.unwrap();
    assert!(!journal.changes_since(TABLE, &after_first).await, "hit publishes nothing");

    h.cache.select(0, 10).await.unwrap();
    assert_eq!(
        journal.ranges_since(TABLE, &after_first).await,
        vec![key_interval(5, 10).unwrap()]
    );
    assert_eq!(journal.observed_keys().await, vec![k(1), k(2), k(3), k(5), k(8)]);
}

// ============================================================================
// SINK UNAVAILABLE & FAILURES
// ============================================================================

#[tokio::test]
async fn test_sink_unavailable_returns_none() {
    init_test_tracing();
    let h = harness(fixtures::sparse_rows());
    assert_eq!(h.registry.unregister_all(TABLE).unwrap(), 1);

    assert!(h.cache.select(0, 10).await.unwrap().is_none());
    assert_eq!(h.table.fetch_count(), 0);
    assert!(h.cache.covered_intervals().unwrap().is_empty());
    assert_eq!(h.cache.stats().sink_unavailable, 1);

    h.registry.register(TABLE, h.sink.clone()).unwrap();
    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered again");
    assert_eq!(view.len(), 5);
}

#[tokio::test]
async fn test_covered_range_needs_no_sink() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 10).await.unwrap();
    h.registry.unregister_all(TABLE).unwrap();

    let view = h.cache.select(2, 6).await.unwrap().expect("served from cache");
    assert_eq!(view.keys(), vec![k(2), k(3), k(5)]);
    assert!(h.cache.select(5, 15).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_failure_leaves_mask_unchanged() {
    init_test_tracing();
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 2).await.unwrap();
    h.table.fail_next_fetch();

    let result = h.cache.select(0, 10).await;
    assert!(matches!(
        result,
        Err(StrataError::Storage(StorageError::FetchFailed { .. }))
    ));
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 2).unwrap()]);
    assert_eq!(h.sink.range_calls(), 1, "only the first select notified");

    // The failed gap is fetched again
    h.cache.select(0, 10).await.unwrap();
    assert_eq!(
        h.table.last_predicate().unwrap().intervals(),
        &[key_interval(2, 10).unwrap()]
    );
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 10).unwrap()]);
}

#[tokio::test]
async fn test_cursor_failure_leaves_gap_uncovered() {
    let h = harness(fixtures::sparse_rows());
    h.table.fail_cursor_after(2);

    let result = h.cache.select(0, 10).await;
    assert!(matches!(
        result,
        Err(StrataError::Storage(StorageError::CursorFailed { .. }))
    ));
    assert!(h.cache.covered_intervals().unwrap().is_empty());
    assert!(h.sink.ranges().is_empty());

    // Rows merged before the failure stay, but are not authoritative
    assert!(h.cache.get(&k(1)).unwrap().is_some());
    assert!(!h.cache.is_covered(&k(1)).unwrap());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(view.len(), 5);
    assert_eq!(h.table.fetch_count(), 2);
}

#[tokio::test]
async fn test_sink_failure_leaves_gap_uncovered() {
    let h = harness(fixtures::sparse_rows());
    h.sink.fail_ranges();

    assert_storage_error(&h.cache.select(0, 10).await);
    assert!(h.cache.covered_intervals().unwrap().is_empty());
    assert_eq!(h.sink.range_calls(), 1);
}

// ============================================================================
// POINT WRITES, LIVE VIEWS & INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_view_is_live() {
    let h = harness(fixtures::sparse_rows());
    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");

    h.cache.put(TestRow::new(4, "fresh"), true).unwrap();
    h.cache.put(TestRow::new(5, "updated"), false).unwrap();
    h.cache.put(TestRow::new(42, "outside"), true).unwrap();

    assert_eq!(view.len(), 6);
    assert_eq!(view.get(&k(4)).map(|row| row.value), Some("fresh".to_string()));
    assert_eq!(view.get(&k(5)).map(|row| row.value), Some("updated".to_string()));
    assert!(view.get(&k(42)).is_none());
    assert_eq!(h.table.fetch_count(), 1);
}

#[tokio::test]
async fn test_point_write_coverage_splits_the_fetch() {
    let h = harness(fixtures::sparse_rows());
    h.cache.put(TestRow::new(4, "fresh"), true).unwrap();
    assert!(h.cache.is_covered(&k(4)).unwrap());
    assert!(!h.cache.is_covered(&k(3)).unwrap());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    let predicate = h.table.last_predicate().unwrap();
    assert_eq!(h.table.fetch_count(), 1);
    assert_eq!(predicate.len(), 2);
    assert!(!predicate.matches(&k(4)));
    assert!(predicate.matches(&k(3)));
    assert!(predicate.matches(&k(5)));

    assert_eq!(view.get(&k(4)).map(|row| row.value), Some("fresh".to_string()));
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 10).unwrap()]);
}

#[tokio::test]
async fn test_invalidate_refetches_only_the_invalidated_range() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 10).await.unwrap();

    h.table.insert(TestRow::new(4, "late"));
    let view = h.cache.select(0, 10).await.unwrap().expect("covered");
    assert!(view.get(&k(4)).is_none(), "covered range is served from cache");

    assert_eq!(h.cache.invalidate(3, 6).unwrap(), 2);
    assert!(!h.cache.is_covered(&k(4)).unwrap());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(
        h.table.last_predicate().unwrap().intervals(),
        &[key_interval(3, 6).unwrap()]
    );
    assert_view_values(
        &view,
        &[
            (k(1), "v1"),
            (k(2), "v2"),
            (k(3), "v3"),
            (k(4), "late"),
            (k(5), "v5"),
            (k(8), "v8"),
        ],
    );
}

#[tokio::test]
async fn test_invalidate_all_forgets_deleted_rows() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 10).await.unwrap();
    h.table.delete(&k(8));

    h.cache.invalidate_all().unwrap();
    assert!(h.cache.covered_intervals().unwrap().is_empty());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(view.keys(), vec![k(1), k(2), k(3), k(5)]);
    assert_eq!(h.table.fetch_count(), 2);
}

#[tokio::test]
async fn test_point_invalidation_is_refetched_by_pushed_down_predicate() {
    let h = harness(fixtures::sparse_rows());
    h.cache.select(0, 10).await.unwrap();

    assert_eq!(h.cache.invalidate(k(3), k(3).successor()).unwrap(), 1);
    assert!(!h.cache.is_covered(&k(3)).unwrap());

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    let predicate = h.table.last_predicate().unwrap();
    assert!(predicate.matches(&k(3)));

    // A store that evaluates the per-column form must still return row 3
    let disjuncts = predicate.column_ranges(1);
    assert_eq!(disjuncts.len(), 1);
    assert_eq!(disjuncts[0].len(), 1);
    assert!(disjuncts[0][0].contains(&k(3).columns()[0]));
    assert!(!disjuncts[0][0].contains(&k(4).columns()[0]));
    assert_eq!(predicate.to_string(), "(c0 = 3)");

    assert_eq!(view.get(&k(3)).map(|row| row.value), Some("v3".to_string()));
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 10).unwrap()]);
}

// ============================================================================
// INVALIDATION DURING A SELECT
// ============================================================================

type MeasurementCache = RangeCache<TestRow, MockTable, InMemorySinkRegistry<TestRow>>;

/// Invalidates a range of the cache from inside the first range
/// notification it receives, i.e. after the select merged its rows but
/// before it extended the mask.
struct InvalidatingSink {
    cache: OnceLock<Weak<MeasurementCache>>,
    from: i64,
    to: i64,
    armed: AtomicBool,
}

impl InvalidatingSink {
    fn new(from: i64, to: i64) -> Self {
        Self {
            cache: OnceLock::new(),
            from,
            to,
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl NotificationSink<TestRow> for InvalidatingSink {
    async fn on_select(&self, _row: &TestRow, _single_row: bool) -> StrataResult<()> {
        Ok(())
    }

    async fn on_select_range(&self, _table: &str, _covered: &[KeyInterval]) -> StrataResult<()> {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
            cache.invalidate(self.from, self.to)?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_invalidate_during_select_is_not_undone() {
    init_test_tracing();
    let h = harness(fixtures::sparse_rows());
    let sink = Arc::new(InvalidatingSink::new(0, 10));
    assert!(sink.cache.set(Arc::downgrade(&h.cache)).is_ok());
    h.registry.register(TABLE, sink.clone()).unwrap();

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert!(!view.was_cache_hit());
    assert!(view.is_empty(), "the invalidation dropped the merged rows");

    assert!(h.cache.covered_intervals().unwrap().is_empty());
    for id in [1, 2, 3, 5, 8] {
        assert!(!h.cache.is_covered(&k(id)).unwrap());
        assert!(h.cache.get(&k(id)).unwrap().is_none());
    }

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(h.table.fetch_count(), 2);
    assert_eq!(view.keys(), vec![k(1), k(2), k(3), k(5), k(8)]);
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 10).unwrap()]);
}

#[tokio::test]
async fn test_invalidate_outside_fetched_gaps_still_blocks_coverage() {
    let h = harness(fixtures::sparse_rows());
    let sink = Arc::new(InvalidatingSink::new(20, 30));
    assert!(sink.cache.set(Arc::downgrade(&h.cache)).is_ok());
    h.registry.register(TABLE, sink.clone()).unwrap();

    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(view.len(), 5);
    assert!(h.cache.covered_intervals().unwrap().is_empty());

    // Rows stay cached, and the refetch restores coverage
    let view = h.cache.select(0, 10).await.unwrap().expect("sink registered");
    assert_eq!(view.len(), 5);
    assert_eq!(h.cache.covered_intervals().unwrap(), vec![key_interval(0, 10).unwrap()]);
}

// ============================================================================
// COMPOSITE KEYS
// ============================================================================

#[tokio::test]
async fn test_composite_keys_are_ordered_lexicographically() {
    let h = harness(fixtures::composite_rows());

    let view = h
        .cache
        .select(("east", 0), ("west", 0))
        .await
        .unwrap()
        .expect("sink registered");
    assert_eq!(
        view.keys(),
        vec![
            Key::from(("east", 1)),
            Key::from(("east", 2)),
            Key::from(("north", 1)),
        ]
    );

    let view = h
        .cache
        .select(("north", 0), ("west", 5))
        .await
        .unwrap()
        .expect("sink registered");
    assert_eq!(
        h.table.last_predicate().unwrap().intervals(),
        &[key_interval(("west", 0), ("west", 5)).unwrap()]
    );
    assert_eq!(
        view.keys(),
        vec![Key::from(("north", 1)), Key::from(("west", 1))]
    );
    assert!(!h.cache.is_covered(&Key::from(("west", 7))).unwrap());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_invalid_config_is_rejected() {
    let result = RangeCache::new(
        CacheConfig::new(""),
        Arc::new(MockTable::<TestRow>::new("")),
        Arc::new(InMemorySinkRegistry::<TestRow>::new()),
    );
    assert!(matches!(result, Err(StrataError::Config(_))));
    assert_config_error(&CacheConfig::new("measurements ").validate());
}

#[tokio::test]
async fn test_fetcher_sees_configured_table() {
    let table = Arc::new(MockTable::with_rows("other", fixtures::sparse_rows()));
    let registry = Arc::new(InMemorySinkRegistry::<TestRow>::new());
    registry
        .register(TABLE, Arc::new(RecordingSink::<TestRow>::new()))
        .unwrap();
    let cache = RangeCache::new(CacheConfig::new(TABLE), table.clone(), registry).unwrap();

    // The mock only serves "other", so a fetch for TABLE fails
    assert_storage_error(&cache.select(0, 10).await);
    assert_eq!(table.fetch_count(), 1);
    assert!(cache.covered_intervals().unwrap().is_empty());
}

#[tokio::test]
async fn test_journal_is_a_notification_sink() {
    let journal = InMemoryChangeJournal::new();
    NotificationSink::<TestRow>::on_select(&journal, &TestRow::new(1, "a"), true)
        .await
        .unwrap();
    assert_eq!(journal.observed_rows().await.len(), 1);
}
