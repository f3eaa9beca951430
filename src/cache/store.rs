//! Tile store: the central coordinator for paged tiles.
//!
//! The store:
//! - Issues tile IDs from a monotonic counter (ranges are reserved, not allocated)
//! - Owns the recency cache of resident tiles and its eviction hook
//! - Builds and hydrates tiles on a cache miss
//! - Lends tiles out exclusively through check-out / check-in
//! - Keeps allocation accounting and the private backing directory
//!
//! Lock order: miss stripe → check-out table → cache → (after release) tile.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::compressor::Compressor;
use crate::cache::lru::RecencyCache;
use crate::cache::stats::{AllocationStats, StoreStats};
use crate::cache::tile::{Access, Tile, TileId};
use crate::config::Config;
use crate::transfer::disk_io::{DiskIoError, DiskIoSnapshot, TileDisk};

/// Number of stripes serializing cache misses by tile id.
const MISS_STRIPES: usize = 64;

/// Attempts at an access whose tile instance keeps getting evicted underneath it.
const MAX_ACCESS_ATTEMPTS: usize = 4;

/// Lookups between periodic hit-rate debug lines.
const STATS_LOG_INTERVAL: u64 = 1_000_000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Tile directory error: {0}")]
    Disk(#[from] DiskIoError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// A tile lent out of the cache, with its nesting depth.
struct CheckedOut {
    tile: Arc<Tile>,
    depth: usize,
}

/// The central tile manager.
pub struct TileStore {
    config: Arc<Config>,

    /// Resident tiles, most recently used first.
    cache: RecencyCache<TileId, Arc<Tile>>,

    /// Tiles currently checked out. They stay reachable through `get_tile`
    /// but cannot be evicted.
    checked_out: Mutex<HashMap<TileId, CheckedOut>>,

    /// Instances that have been built and not yet evicted. Lets a miss find a
    /// tile that was trimmed but whose eviction has not run yet.
    live: Arc<Mutex<HashMap<TileId, Weak<Tile>>>>,

    miss_locks: Box<[Mutex<()>]>,

    next_id: AtomicU64,

    disk: Arc<TileDisk>,

    stats: Arc<AllocationStats>,

    lookups: AtomicU64,
}

impl TileStore {
    /// Create a store: make the private directory and wire the eviction hook.
    pub fn new(config: Arc<Config>) -> Result<Self, StoreError> {
        let stats = Arc::new(AllocationStats::new()?);
        let disk = Arc::new(TileDisk::create(
            &config.store.resolved_temp_root(),
            &config.store.dir_prefix,
            config.store.max_dir_attempts,
            Compressor::new(config.compression.clone()),
        )?);

        let cache = RecencyCache::new(
            config.cache.min_tiles,
            config.cache.current_tiles,
            config.cache.max_tiles,
        );

        let live: Arc<Mutex<HashMap<TileId, Weak<Tile>>>> = Arc::new(Mutex::new(HashMap::new()));

        {
            let disk = disk.clone();
            let stats = stats.clone();
            let live = live.clone();
            cache.add_listener(Arc::new(move |tile: &Arc<Tile>| {
                tile.evict(&disk, &stats);
                forget_instance(&live, tile);
            }));
        }

        let miss_locks: Box<[Mutex<()>]> = (0..MISS_STRIPES).map(|_| Mutex::new(())).collect();

        info!(
            dir = %disk.root().display(),
            tile_size = config.store.tile_size,
            capacity = cache.capacity(),
            max_ram_mb = config.max_memory_bytes() / (1024 * 1024),
            "Tile store initialized"
        );

        Ok(Self {
            config,
            cache,
            checked_out: Mutex::new(HashMap::new()),
            live,
            miss_locks,
            next_id: AtomicU64::new(0),
            disk,
            stats,
            lookups: AtomicU64::new(0),
        })
    }

    /// Reserve a single fresh tile id.
    pub fn reserve_id(&self) -> TileId {
        self.reserve_id_range(1)
    }

    /// Reserve `count` consecutive tile ids and return the first.
    ///
    /// Nothing is allocated: tiles are built lazily on first access.
    pub fn reserve_id_range(&self, count: u64) -> TileId {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    fn stripe(&self, id: TileId) -> &Mutex<()> {
        &self.miss_locks[(id % MISS_STRIPES as u64) as usize]
    }

    /// Get a tile, building and hydrating it on a miss.
    ///
    /// A hit is promoted to most recently used. A checked-out tile is returned
    /// as the same shared instance, without promotion. If the buffer cannot be
    /// allocated the returned tile is unloaded and is not cached.
    pub fn get_tile(&self, id: TileId, size: usize, background: f32) -> Arc<Tile> {
        self.note_lookup();
        if let Some(tile) = self.cache.get(&id) {
            self.stats.record_hit();
            return tile;
        }

        let _miss = self.stripe(id).lock();
        if let Some(tile) = self.cache.get(&id) {
            self.stats.record_hit();
            return tile;
        }
        if let Some(lent) = self.checked_out.lock().get(&id) {
            self.stats.record_hit();
            return lent.tile.clone();
        }

        self.stats.record_miss();
        let tile = self.build_tile(id, size, background);
        if tile.is_resident() {
            self.cache.put(id, tile.clone());
        }
        tile
    }

    /// Look up a resident tile without building it or changing recency order.
    pub fn peek_tile(&self, id: TileId) -> Option<Arc<Tile>> {
        self.cache
            .get_without_promotion(&id)
            .or_else(|| self.checked_out.lock().get(&id).map(|c| c.tile.clone()))
    }

    /// Build a tile instance and hydrate it. Caller holds the id's miss stripe.
    fn build_tile(&self, id: TileId, size: usize, background: f32) -> Arc<Tile> {
        // A trimmed instance whose eviction has not run yet must reach disk
        // before we read the file back.
        let orphan = self.live.lock().get(&id).and_then(Weak::upgrade);
        if let Some(orphan) = orphan {
            debug!(tile_id = id, "Flushing trimmed tile before rebuild");
            orphan.evict(&self.disk, &self.stats);
            forget_instance(&self.live, &orphan);
        }

        let tile = Arc::new(Tile::new(id, size, background));
        if tile.load(&self.disk, &self.stats) {
            debug!(tile_id = id, from_disk = tile.was_loaded_from_disk(), "Tile loaded");
            self.live.lock().insert(id, Arc::downgrade(&tile));
        } else {
            error!(tile_id = id, "Wasn't able to create/load a tile");
        }
        tile
    }

    /// Take a tile out of cache management for a run of bulk writes.
    ///
    /// While checked out the tile cannot be evicted. Check-outs of the same id
    /// nest; the tile returns to the cache on the last matching check-in.
    pub fn check_out(&self, id: TileId, size: usize, background: f32) -> Arc<Tile> {
        let _miss = self.stripe(id).lock();
        if let Some(entry) = self.checked_out.lock().get_mut(&id) {
            entry.depth += 1;
            return entry.tile.clone();
        }

        // The stripe keeps the id out of both tables until the insert below.
        let tile = match self.cache.pop(&id) {
            Some(tile) => {
                self.stats.record_hit();
                tile
            }
            None => {
                self.stats.record_miss();
                self.build_tile(id, size, background)
            }
        };
        self.checked_out.lock().insert(
            id,
            CheckedOut {
                tile: tile.clone(),
                depth: 1,
            },
        );
        tile
    }

    /// Return a checked-out tile to the cache, subject to normal eviction.
    pub fn check_in(&self, id: TileId, tile: Arc<Tile>) {
        let _miss = self.stripe(id).lock();
        let release = {
            let mut lent = self.checked_out.lock();
            match lent.get_mut(&id) {
                Some(entry) => {
                    if !Arc::ptr_eq(&entry.tile, &tile) {
                        warn!(tile_id = id, "Checked in a different instance than was lent");
                    }
                    entry.depth -= 1;
                    if entry.depth == 0 {
                        lent.remove(&id).map(|e| e.tile)
                    } else {
                        None
                    }
                }
                None => {
                    warn!(tile_id = id, "Check-in without a matching check-out, ignored");
                    None
                }
            }
        };

        if let Some(tile) = release {
            if tile.is_resident() {
                self.cache.put(id, tile);
            }
        }
    }

    /// Whether `id` is currently checked out.
    pub fn is_checked_out(&self, id: TileId) -> bool {
        self.checked_out.lock().contains_key(&id)
    }

    /// Read one value, looking the tile up again if it is evicted mid-access.
    pub fn read_value(&self, id: TileId, size: usize, background: f32, index: usize) -> f32 {
        for _ in 0..MAX_ACCESS_ATTEMPTS {
            if let Access::Done(v) = self.get_tile(id, size, background).try_get(index) {
                return v;
            }
        }
        warn!(tile_id = id, "Tile kept being evicted during read");
        background
    }

    /// Write one value, looking the tile up again if it is evicted mid-access.
    pub fn write_value(&self, id: TileId, size: usize, background: f32, index: usize, value: f32) {
        for _ in 0..MAX_ACCESS_ATTEMPTS {
            if let Access::Done(()) = self.get_tile(id, size, background).try_set(index, value) {
                return;
            }
        }
        error!(tile_id = id, "Tile kept being evicted during write, value dropped");
    }

    /// Write a run of values, looking the tile up again if it is evicted mid-access.
    pub fn write_slice(&self, id: TileId, size: usize, background: f32, index: usize, values: &[f32]) {
        for _ in 0..MAX_ACCESS_ATTEMPTS {
            let tile = self.get_tile(id, size, background);
            if let Access::Done(()) = tile.try_set_slice(index, values) {
                return;
            }
        }
        error!(tile_id = id, "Tile kept being evicted during write, values dropped");
    }

    /// Drop the tiles in `ids` without writing them, and delete their files.
    ///
    /// Checked-out tiles are skipped.
    pub fn discard_range(&self, ids: Range<TileId>) {
        let mut discarded = 0usize;
        for id in ids {
            let _miss = self.stripe(id).lock();
            if self.checked_out.lock().contains_key(&id) {
                continue;
            }
            if let Some(tile) = self.cache.pop(&id) {
                tile.discard(&self.stats);
                forget_instance(&self.live, &tile);
                discarded += 1;
            }
            if let Err(e) = self.disk.delete_tile(id) {
                warn!(tile_id = id, error = %e, "Failed to delete tile file");
            }
        }
        if discarded > 0 {
            debug!(discarded, "Discarded resident tiles");
        }
    }

    /// Force every resident tile out to disk.
    pub fn purge_all(&self) -> usize {
        info!("Purging all tiles from RAM");
        self.cache.clear()
    }

    /// Change the resident tile capacity. Ignored outside the configured bounds.
    pub fn set_capacity(&self, tiles: usize) -> bool {
        self.cache.set_current_size(tiles)
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Number of resident tiles under cache management.
    pub fn resident_count(&self) -> usize {
        self.cache.len()
    }

    /// Recommended tile size in floats.
    pub fn recommended_tile_size(&self) -> usize {
        self.config.store.tile_size
    }

    /// Upper bound on resident tile memory at the current capacity.
    pub fn max_memory_bytes(&self) -> usize {
        self.recommended_tile_size() * std::mem::size_of::<f32>() * self.capacity()
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The private backing directory.
    pub fn dir(&self) -> &Path {
        self.disk.root()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }

    pub fn disk_stats(&self) -> DiskIoSnapshot {
        self.disk.stats()
    }

    /// Bytes of tile files currently on disk; 0 if the directory can't be read.
    pub fn disk_usage(&self) -> u64 {
        self.disk.disk_usage().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to measure tile directory");
            0
        })
    }

    /// Counters in the prometheus text exposition format.
    pub fn metrics_text(&self) -> String {
        self.stats.render()
    }

    fn note_lookup(&self) {
        let n = self.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_LOG_INTERVAL == 0 {
            let s = self.stats.snapshot();
            debug!(
                lookups = n,
                hits = s.hits,
                misses = s.misses,
                hit_rate = s.hit_rate(),
                "Tile lookup stats"
            );
        }
    }
}

impl Drop for TileStore {
    fn drop(&mut self) {
        if self.config.store.remove_on_shutdown {
            match self.disk.remove_all() {
                Ok(()) => info!(dir = %self.disk.root().display(), "Removed tile directory"),
                Err(e) => warn!(error = %e, "Failed to remove tile directory"),
            }
        }
    }
}

/// Remove `tile` from the live-instance table if it is still the entry for its id.
fn forget_instance(live: &Mutex<HashMap<TileId, Weak<Tile>>>, tile: &Arc<Tile>) {
    let mut live = live.lock();
    let same = live
        .get(&tile.id())
        .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(tile)));
    if same {
        live.remove(&tile.id());
    }
}

/// Thread-safe handle to a tile store.
pub type SharedStore = Arc<TileStore>;

/// Create a new shared tile store.
pub fn new_shared_store(config: Arc<Config>) -> Result<SharedStore, StoreError> {
    Ok(Arc::new(TileStore::new(config)?))
}
