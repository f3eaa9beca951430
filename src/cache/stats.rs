//! Allocation and access accounting for the tile store.
//!
//! Diagnostics only: nothing here enforces a limit. Counters live in a
//! store-owned prometheus [`Registry`] so several stores in one process do not
//! collide on metric names.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Bytes currently held by resident tile buffers.
    pub live_bytes: i64,
    /// Bytes ever allocated for tile buffers.
    pub allocated_bytes: u64,
    /// Bytes released by eviction.
    pub deallocated_bytes: u64,
    /// Bytes requested by allocations that failed.
    pub failed_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub tiles_written: u64,
    /// Evictions that skipped the write because disk already held the data.
    pub writes_skipped: u64,
    pub tiles_hydrated: u64,
}

impl StoreStats {
    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Prometheus-backed counters shared by the store and its eviction hook.
pub struct AllocationStats {
    registry: Registry,
    live_bytes: IntGauge,
    allocated_bytes: IntCounter,
    deallocated_bytes: IntCounter,
    failed_bytes: IntCounter,
    hits: IntCounter,
    misses: IntCounter,
    tiles_written: IntCounter,
    writes_skipped: IntCounter,
    tiles_hydrated: IntCounter,
}

impl AllocationStats {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let live_bytes = IntGauge::new("tile_live_bytes", "Bytes held by resident tiles")?;
        let allocated_bytes =
            IntCounter::new("tile_allocated_bytes_total", "Bytes allocated for tiles")?;
        let deallocated_bytes =
            IntCounter::new("tile_deallocated_bytes_total", "Bytes released by eviction")?;
        let failed_bytes =
            IntCounter::new("tile_failed_bytes_total", "Bytes of failed tile allocations")?;
        let hits = IntCounter::new("tile_cache_hits_total", "Tile lookups served from RAM")?;
        let misses = IntCounter::new("tile_cache_misses_total", "Tile lookups that built a tile")?;
        let tiles_written = IntCounter::new("tile_writes_total", "Tiles serialized on eviction")?;
        let writes_skipped = IntCounter::new(
            "tile_writes_skipped_total",
            "Evictions that found disk already up to date",
        )?;
        let tiles_hydrated =
            IntCounter::new("tile_hydrations_total", "Tiles restored from disk")?;

        registry.register(Box::new(live_bytes.clone()))?;
        registry.register(Box::new(allocated_bytes.clone()))?;
        registry.register(Box::new(deallocated_bytes.clone()))?;
        registry.register(Box::new(failed_bytes.clone()))?;
        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        registry.register(Box::new(tiles_written.clone()))?;
        registry.register(Box::new(writes_skipped.clone()))?;
        registry.register(Box::new(tiles_hydrated.clone()))?;

        Ok(Self {
            registry,
            live_bytes,
            allocated_bytes,
            deallocated_bytes,
            failed_bytes,
            hits,
            misses,
            tiles_written,
            writes_skipped,
            tiles_hydrated,
        })
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.allocated_bytes.inc_by(bytes as u64);
        self.live_bytes.add(bytes as i64);
    }

    pub fn record_deallocation(&self, bytes: usize) {
        self.deallocated_bytes.inc_by(bytes as u64);
        self.live_bytes.sub(bytes as i64);
    }

    pub fn record_failure(&self, bytes: usize) {
        self.failed_bytes.inc_by(bytes as u64);
    }

    pub fn record_hit(&self) {
        self.hits.inc();
    }

    pub fn record_miss(&self) {
        self.misses.inc();
    }

    pub fn record_write(&self) {
        self.tiles_written.inc();
    }

    pub fn record_skipped_write(&self) {
        self.writes_skipped.inc();
    }

    pub fn record_hydration(&self) {
        self.tiles_hydrated.inc();
    }

    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            live_bytes: self.live_bytes.get(),
            allocated_bytes: self.allocated_bytes.get(),
            deallocated_bytes: self.deallocated_bytes.get(),
            failed_bytes: self.failed_bytes.get(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            tiles_written: self.tiles_written.get(),
            writes_skipped: self.writes_skipped.get(),
            tiles_hydrated: self.tiles_hydrated.get(),
        }
    }

    /// Render all counters in the prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode tile metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
