//! Live sub-views of the ordered store.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use strata_core::{Key, KeyInterval};

use super::traits::CacheableRow;

/// A live view of the store over `[from, to)`.
///
/// The view holds no copy of the rows: every read goes to the shared
/// store, so writes made after the view was handed out (point writes,
/// later fetches) are visible through it. It also carries the gaps the
/// producing `select` had to fetch, in the manner of a cache-read
/// receipt.
///
/// # Lock poisoning
///
/// Unlike [`CacheMap`](super::store::CacheMap), whose accessors report a
/// poisoned store lock as `StorageError::LockPoisoned`, view reads are
/// infallible and keep reading through a poisoned lock. Every writer
/// finishes each map operation before it can panic, so the map a view
/// sees is always a valid ordered map; at worst a `remove_range` was cut
/// short and some of its rows are still present.
#[derive(Debug, Clone)]
pub struct RangeView<R> {
    entries: Arc<RwLock<BTreeMap<Key, R>>>,
    bounds: KeyInterval,
    fetched: Vec<KeyInterval>,
}

impl<R: CacheableRow> RangeView<R> {
    pub(crate) fn new(
        entries: Arc<RwLock<BTreeMap<Key, R>>>,
        bounds: KeyInterval,
        fetched: Vec<KeyInterval>,
    ) -> Self {
        Self {
            entries,
            bounds,
            fetched,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Key, R>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The `[from, to)` bounds of the view.
    pub fn bounds(&self) -> &KeyInterval {
        &self.bounds
    }

    /// True if the producing `select` needed no backing-store fetch.
    pub fn was_cache_hit(&self) -> bool {
        self.fetched.is_empty()
    }

    /// The gap intervals the producing `select` fetched.
    pub fn fetched_gaps(&self) -> &[KeyInterval] {
        &self.fetched
    }

    /// Row at `key`, if it is inside the bounds and present.
    pub fn get(&self, key: &Key) -> Option<R> {
        if !self.bounds.contains(key) {
            return None;
        }
        self.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.bounds.contains(key) && self.read().contains_key(key)
    }

    /// Number of rows currently inside the bounds.
    pub fn len(&self) -> usize {
        self.read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
            .count()
    }

    /// True if no row currently lies inside the bounds. An empty view is
    /// still a valid answer: it confirms there are no rows in the range.
    pub fn is_empty(&self) -> bool {
        self.read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
            .next()
            .is_none()
    }

    /// Keys currently inside the bounds, in order.
    pub fn keys(&self) -> Vec<Key> {
        self.read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Rows currently inside the bounds, in key order.
    pub fn entries(&self) -> Vec<(Key, R)> {
        self.read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect()
    }

    /// Point-in-time copy of the view.
    pub fn to_map(&self) -> BTreeMap<Key, R> {
        self.read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect()
    }

    /// Visit every row inside the bounds while holding a read lock.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Key, &R),
    {
        for (key, row) in self
            .read()
            .range::<Key, _>(self.bounds.start()..self.bounds.end())
        {
            f(key, row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::key_interval;

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        id: i64,
        celsius: f64,
    }

    impl CacheableRow for Reading {
        fn row_key(&self) -> Key {
            Key::from(self.id)
        }
    }

    type Shared = Arc<RwLock<BTreeMap<Key, Reading>>>;

    fn shared(ids: &[i64]) -> Shared {
        let map = ids
            .iter()
            .map(|&id| {
                (
                    Key::from(id),
                    Reading {
                        id,
                        celsius: id as f64 / 2.0,
                    },
                )
            })
            .collect();
        Arc::new(RwLock::new(map))
    }

    fn view(entries: &Shared, from: i64, to: i64) -> RangeView<Reading> {
        RangeView::new(Arc::clone(entries), key_interval(from, to).unwrap(), Vec::new())
    }

    #[test]
    fn test_bounds_are_half_open() {
        let entries = shared(&[1, 3, 5, 7]);
        let view = view(&entries, 3, 7);

        assert_eq!(view.keys(), vec![Key::from(3), Key::from(5)]);
        assert!(view.contains_key(&Key::from(3)));
        assert!(!view.contains_key(&Key::from(7)), "upper bound is exclusive");
        assert!(!view.contains_key(&Key::from(1)));
        assert_eq!(view.get(&Key::from(7)), None);
        assert_eq!(view.get(&Key::from(5)).map(|r| r.celsius), Some(2.5));
        assert_eq!(view.len(), 2);
        assert_eq!(view.bounds(), &key_interval(3, 7).unwrap());
    }

    #[test]
    fn test_reads_follow_later_writes() {
        let entries = shared(&[2]);
        let view = view(&entries, 0, 10);
        assert_eq!(view.len(), 1);

        entries.write().unwrap().insert(Key::from(4), Reading { id: 4, celsius: 9.0 });
        entries.write().unwrap().insert(Key::from(12), Reading { id: 12, celsius: 1.0 });
        assert_eq!(view.keys(), vec![Key::from(2), Key::from(4)]);

        entries.write().unwrap().remove(&Key::from(2));
        assert_eq!(view.keys(), vec![Key::from(4)]);

        entries.write().unwrap().clear();
        assert!(view.is_empty());
    }

    #[test]
    fn test_snapshots_and_visitor() {
        let entries = shared(&[1, 2, 3, 9]);
        let view = view(&entries, 1, 4);

        let snapshot = view.to_map();
        let pairs = view.entries();
        entries.write().unwrap().remove(&Key::from(2));

        assert_eq!(snapshot.len(), 3, "to_map is a copy");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, Key::from(1));

        let mut visited = Vec::new();
        view.for_each(|key, row| visited.push((key.clone(), row.id)));
        assert_eq!(visited, vec![(Key::from(1), 1), (Key::from(3), 3)]);
    }

    #[test]
    fn test_fetch_receipt() {
        let entries = shared(&[]);
        assert!(view(&entries, 0, 5).was_cache_hit());

        let gaps = vec![key_interval(0, 2).unwrap(), key_interval(4, 5).unwrap()];
        let fetched = RangeView::new(Arc::clone(&entries), key_interval(0, 5).unwrap(), gaps.clone());
        assert!(!fetched.was_cache_hit());
        assert_eq!(fetched.fetched_gaps(), gaps.as_slice());
        assert!(fetched.is_empty());
    }

    #[test]
    fn test_reads_survive_a_poisoned_lock() {
        let entries = shared(&[1, 2]);
        let writer = Arc::clone(&entries);
        let result = std::thread::spawn(move || {
            let mut guard = writer.write().unwrap();
            guard.insert(Key::from(3), Reading { id: 3, celsius: 0.0 });
            panic!("writer died holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(entries.read().is_err(), "lock is poisoned");

        let view = view(&entries, 0, 10);
        assert_eq!(view.keys(), vec![Key::from(1), Key::from(2), Key::from(3)]);
        assert_eq!(view.get(&Key::from(3)).map(|r| r.id), Some(3));
    }
}
