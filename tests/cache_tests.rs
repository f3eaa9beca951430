//! Integration tests for the recency cache and the tile store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use tile_pager::cache::lru::RecencyCache;
use tile_pager::cache::store::{new_shared_store, SharedStore};
use tile_pager::config::Config;

fn recording_cache(
    min: usize,
    current: usize,
    max: usize,
) -> (RecencyCache<&'static str, u32>, Arc<Mutex<Vec<u32>>>) {
    let cache = RecencyCache::new(min, current, max);
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = evicted.clone();
    cache.add_listener(Arc::new(move |v: &u32| sink.lock().push(*v)));
    (cache, evicted)
}

fn test_store(tmp: &TempDir, current_tiles: usize) -> SharedStore {
    let mut config = Config::default();
    config.store.temp_root = Some(tmp.path().to_path_buf());
    config.store.tile_size = 64;
    config.cache.min_tiles = 1;
    config.cache.current_tiles = current_tiles;
    config.cache.max_tiles = 16;
    new_shared_store(Arc::new(config)).unwrap()
}

#[test]
fn test_lru_evicts_first_inserted() {
    let (cache, evicted) = recording_cache(1, 3, 10);
    cache.put("a", 1);
    cache.put("b", 2);
    cache.put("c", 3);
    cache.put("d", 4);

    assert_eq!(*evicted.lock(), vec![1]);
    assert!(!cache.contains(&"a"));
    assert_eq!(cache.snapshot(), vec![4, 3, 2]);
}

#[test]
fn test_lru_get_protects_entry() {
    let (cache, evicted) = recording_cache(1, 3, 10);
    cache.put("a", 1);
    cache.put("b", 2);
    cache.put("c", 3);
    assert_eq!(cache.get(&"a"), Some(1));
    cache.put("d", 4);

    assert_eq!(*evicted.lock(), vec![2]);
    assert!(cache.contains(&"a"));
}

#[test]
fn test_peek_does_not_promote() {
    let (cache, evicted) = recording_cache(1, 2, 10);
    cache.put("a", 1);
    cache.put("b", 2);
    assert_eq!(cache.get_without_promotion(&"a"), Some(1));
    cache.put("c", 3);
    assert_eq!(*evicted.lock(), vec![1]);
}

#[test]
fn test_concrete_capacity_scenario() {
    let (cache, evicted) = recording_cache(1, 2, 5);
    cache.put("A", 1);
    cache.put("B", 2);
    assert_eq!(cache.snapshot(), vec![2, 1]);
    cache.get(&"A");
    cache.put("C", 3);
    assert_eq!(cache.snapshot(), vec![3, 1]);
    assert_eq!(*evicted.lock(), vec![2]);
}

#[test]
fn test_every_trimmed_value_notified_once() {
    let (cache, evicted) = recording_cache(1, 10, 10);
    for (i, key) in ["a", "b", "c", "d", "e", "f"].into_iter().enumerate() {
        cache.put(key, i as u32);
    }
    assert_eq!(cache.trim_matching(|v| v % 2 == 0), 3);
    assert_eq!(cache.trim(1), 2);
    assert_eq!(cache.trim(0), 1);
    assert_eq!(cache.trim(0), 0);

    let mut seen = evicted.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_listener_reenters_cache() {
    let cache: Arc<RecencyCache<u32, u32>> = Arc::new(RecencyCache::new(1, 2, 10));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let weak = Arc::downgrade(&cache);
        let calls = calls.clone();
        cache.add_listener(Arc::new(move |v: &u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(cache) = weak.upgrade() {
                // Unrelated key; must not deadlock.
                cache.get(&999);
                assert!(!cache.contains(v));
            }
        }));
    }
    for i in 0..5 {
        cache.put(i, i);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_pop_is_silent() {
    let (cache, evicted) = recording_cache(1, 4, 10);
    cache.put("a", 1);
    assert_eq!(cache.pop(&"a"), Some(1));
    assert_eq!(cache.pop(&"a"), None);
    assert!(evicted.lock().is_empty());
    assert!(cache.is_empty());
}

#[test]
fn test_store_round_trip_under_pressure() {
    let tmp = TempDir::new().unwrap();
    let store = test_store(&tmp, 3);
    let base = store.reserve_id_range(10);

    for t in 0..10u64 {
        for i in 0..64 {
            store.write_value(base + t, 64, 1.0, i, (t * 1000 + i as u64) as f32);
        }
    }
    assert_eq!(store.resident_count(), 3);
    for t in 0..10u64 {
        for i in 0..64 {
            assert_eq!(store.read_value(base + t, 64, 1.0, i), (t * 1000 + i as u64) as f32);
        }
    }

    let stats = store.stats();
    assert_eq!(stats.live_bytes, 3 * 64 * 4);
    assert!(stats.tiles_hydrated >= 7);
}

#[test]
fn test_checked_out_tile_shared_not_copied() {
    let tmp = TempDir::new().unwrap();
    let store = test_store(&tmp, 2);
    let id = store.reserve_id();
    let lent = store.check_out(id, 64, 0.0);

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || store.write_value(id, 64, 0.0, 5, 8.0))
    };
    writer.join().unwrap();

    // The concurrent write landed in the lent instance.
    assert_eq!(lent.get(5), 8.0);
    store.check_in(id, lent);
    assert_eq!(store.read_value(id, 64, 0.0, 5), 8.0);
}

#[test]
fn test_metrics_text_reports_store_activity() {
    let tmp = TempDir::new().unwrap();
    let store = test_store(&tmp, 1);
    store.write_value(0, 64, 0.0, 0, 1.0);
    store.write_value(1, 64, 0.0, 0, 1.0);
    let text = store.metrics_text();
    assert!(text.contains("tile_writes_total 1"));
    assert!(text.contains("tile_cache_misses_total 2"));
}
