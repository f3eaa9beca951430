//! Tile: one fixed-capacity page of f32 values.
//!
//! A tile is the unit of caching, eviction and persistence. Its buffer is
//! either resident or absent; every transition happens under the tile's own
//! lock, and that lock is also held across disk reads and writes.
//!
//! Stored values go through the background codec (see [`codec`]), so a freshly
//! allocated, zero-filled buffer reads back as the tile's background.

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::cache::codec;
use crate::cache::stats::AllocationStats;
use crate::transfer::disk_io::TileDisk;

/// Unique identifier for a tile.
pub type TileId = u64;

/// Where a tile's data currently lives.
#[derive(Debug)]
enum Residency {
    /// Constructed but not yet allocated.
    Pending,
    /// Buffer in RAM.
    Resident(Vec<f32>),
    /// Buffer released by eviction; this instance is retired.
    Evicted,
    /// Allocation failed; reads give background, writes are dropped.
    Failed,
}

#[derive(Debug)]
struct TileState {
    residency: Residency,
    background: f32,
    /// Set by any write since the buffer was loaded.
    dirty: bool,
    /// The buffer was hydrated from a file on disk.
    loaded_from_disk: bool,
}

/// Result of an access against a tile instance that may have been evicted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Access<T> {
    Done(T),
    /// The instance was evicted; look the tile up again.
    Retired,
}

/// A single tile.
#[derive(Debug)]
pub struct Tile {
    id: TileId,

    /// Declared capacity in floats.
    size: usize,

    state: Mutex<TileState>,
}

impl Tile {
    /// Create an unallocated tile. Call [`Tile::load`] before use.
    pub fn new(id: TileId, size: usize, background: f32) -> Self {
        Self {
            id,
            size,
            state: Mutex::new(TileState {
                residency: Residency::Pending,
                background,
                dirty: false,
                loaded_from_disk: false,
            }),
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    /// Declared capacity in floats.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn byte_size(&self) -> usize {
        self.size.saturating_mul(std::mem::size_of::<f32>())
    }

    pub fn background(&self) -> f32 {
        self.state.lock().background
    }

    /// Change the background. Values already stored are reinterpreted.
    pub fn set_background(&self, background: f32) {
        self.state.lock().background = background;
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.state.lock().residency, Residency::Resident(_))
    }

    /// Allocation failed; the tile stays unloaded for its lifetime.
    pub fn is_failed(&self) -> bool {
        matches!(self.state.lock().residency, Residency::Failed)
    }

    pub fn is_evicted(&self) -> bool {
        matches!(self.state.lock().residency, Residency::Evicted)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn was_loaded_from_disk(&self) -> bool {
        self.state.lock().loaded_from_disk
    }

    /// Allocate the buffer and hydrate it from disk if a file exists.
    ///
    /// Returns false if the buffer could not be allocated. A missing file is
    /// normal (never persisted); any other read fault is logged and leaves the
    /// buffer at background.
    pub fn load(&self, disk: &TileDisk, stats: &AllocationStats) -> bool {
        let mut state = self.state.lock();
        match state.residency {
            Residency::Resident(_) => return true,
            Residency::Failed => return false,
            Residency::Pending | Residency::Evicted => {}
        }

        let mut buffer: Vec<f32> = Vec::new();
        if buffer.try_reserve_exact(self.size).is_err() {
            error!(tile_id = self.id, floats = self.size, "Could not allocate tile buffer");
            stats.record_failure(self.byte_size());
            state.residency = Residency::Failed;
            return false;
        }
        buffer.resize(self.size, 0.0);
        stats.record_allocation(self.byte_size());

        match disk.read_tile(self.id, &mut buffer) {
            Ok(Some(_)) => {
                state.loaded_from_disk = true;
                stats.record_hydration();
            }
            Ok(None) => {}
            Err(e) => {
                error!(tile_id = self.id, error = %e, "Disk error restoring tile");
                buffer.iter_mut().for_each(|v| *v = 0.0);
            }
        }

        state.residency = Residency::Resident(buffer);
        state.dirty = false;
        true
    }

    /// Serialize (if needed) and release the buffer.
    ///
    /// The write is skipped when the buffer was hydrated from disk and never
    /// modified since. Returns false only if a needed write failed; the data
    /// for this tile is then lost.
    pub fn evict(&self, disk: &TileDisk, stats: &AllocationStats) -> bool {
        let mut state = self.state.lock();
        let buffer = match std::mem::replace(&mut state.residency, Residency::Evicted) {
            Residency::Resident(buffer) => buffer,
            other => {
                state.residency = other;
                return true;
            }
        };

        let mut success = true;
        if state.dirty || !state.loaded_from_disk {
            match disk.write_tile(self.id, &buffer) {
                Ok(_) => {
                    stats.record_write();
                    state.loaded_from_disk = true;
                }
                Err(e) => {
                    error!(tile_id = self.id, error = %e, "Can't offload tile to disk");
                    success = false;
                }
            }
        } else {
            debug!(tile_id = self.id, "Skipping tile write, disk copy is current");
            stats.record_skipped_write();
        }

        state.dirty = false;
        drop(buffer);
        stats.record_deallocation(self.byte_size());
        success
    }

    /// Release the buffer without writing it. The instance is retired.
    pub fn discard(&self, stats: &AllocationStats) {
        let mut state = self.state.lock();
        if let Residency::Resident(_) = state.residency {
            state.residency = Residency::Evicted;
            state.dirty = false;
            stats.record_deallocation(self.byte_size());
        }
    }

    /// Read one value, reporting whether this instance was retired.
    pub fn try_get(&self, index: usize) -> Access<f32> {
        let state = self.state.lock();
        match &state.residency {
            Residency::Resident(buffer) => Access::Done(match buffer.get(index) {
                Some(&stored) => codec::decode(stored, state.background),
                None => state.background,
            }),
            Residency::Evicted => Access::Retired,
            Residency::Pending | Residency::Failed => Access::Done(state.background),
        }
    }

    /// Write one value, reporting whether this instance was retired.
    ///
    /// An out-of-range index or an unloaded tile is logged and ignored.
    pub fn try_set(&self, index: usize, value: f32) -> Access<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let background = state.background;
        match &mut state.residency {
            Residency::Resident(buffer) => {
                if let Some(slot) = buffer.get_mut(index) {
                    *slot = codec::encode(value, background);
                    state.dirty = true;
                } else {
                    warn!(tile_id = self.id, index, size = self.size, "Tile index out of bounds");
                }
                Access::Done(())
            }
            Residency::Evicted => Access::Retired,
            Residency::Pending | Residency::Failed => {
                error!(tile_id = self.id, "Can't set value on unloaded tile");
                Access::Done(())
            }
        }
    }

    /// Write a run of values starting at `index`, reporting retirement.
    pub fn try_set_slice(&self, index: usize, values: &[f32]) -> Access<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let background = state.background;
        match &mut state.residency {
            Residency::Resident(buffer) => {
                match index.checked_add(values.len()) {
                    Some(end) if end <= buffer.len() => {
                        let dst = &mut buffer[index..end];
                        dst.copy_from_slice(values);
                        codec::encode_slice(dst, background);
                        state.dirty = true;
                    }
                    _ => warn!(
                        tile_id = self.id,
                        index,
                        count = values.len(),
                        size = self.size,
                        "Tile slice out of bounds"
                    ),
                }
                Access::Done(())
            }
            Residency::Evicted => Access::Retired,
            Residency::Pending | Residency::Failed => {
                error!(tile_id = self.id, "Can't set values on unloaded tile");
                Access::Done(())
            }
        }
    }

    /// Read one value; background if unloaded, evicted or out of range.
    pub fn get(&self, index: usize) -> f32 {
        match self.try_get(index) {
            Access::Done(v) => v,
            Access::Retired => self.background(),
        }
    }

    /// Write one value; dropped (and logged) if the tile cannot take it.
    pub fn set(&self, index: usize, value: f32) {
        if self.try_set(index, value) == Access::Retired {
            error!(tile_id = self.id, "Write to evicted tile dropped");
        }
    }

    /// Write a run of values starting at `index`.
    pub fn set_slice(&self, index: usize, values: &[f32]) {
        if self.try_set_slice(index, values) == Access::Retired {
            error!(tile_id = self.id, "Write to evicted tile dropped");
        }
    }

    /// Run `f` over the raw stored (encoded) buffer while holding the tile lock.
    ///
    /// Returns None if the tile is not resident.
    pub fn with_raw<R>(&self, f: impl FnOnce(&[f32]) -> R) -> Option<R> {
        let state = self.state.lock();
        match &state.residency {
            Residency::Resident(buffer) => Some(f(buffer)),
            _ => None,
        }
    }

    /// Run `f` over the raw stored buffer with write access. Marks the tile dirty.
    ///
    /// Values written here bypass the background codec.
    pub fn with_raw_mut<R>(&self, f: impl FnOnce(&mut [f32]) -> R) -> Option<R> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &mut state.residency {
            Residency::Resident(buffer) => {
                state.dirty = true;
                Some(f(buffer))
            }
            _ => None,
        }
    }

    /// Copy of the stored (encoded) buffer, if resident.
    pub fn encoded_snapshot(&self) -> Option<Vec<f32>> {
        self.with_raw(|buffer| buffer.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::SENTINEL;
    use crate::cache::compressor::Compressor;
    use crate::config::CompressionConfig;
    use tempfile::TempDir;

    const BG: f32 = -99_900.0;

    fn fixtures() -> (TempDir, TileDisk, AllocationStats) {
        let tmp = TempDir::new().unwrap();
        let disk = TileDisk::create(
            tmp.path(),
            "tile",
            9,
            Compressor::new(CompressionConfig::default()),
        )
        .unwrap();
        (tmp, disk, AllocationStats::new().unwrap())
    }

    #[test]
    fn test_encoded_storage() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(1, 4, BG);
        assert!(tile.load(&disk, &stats));

        tile.set(0, BG);
        tile.set(1, 0.0);
        tile.set(2, 5.0);
        tile.set(3, BG);

        assert_eq!(tile.encoded_snapshot().unwrap(), vec![0.0, SENTINEL, 5.0, 0.0]);
        let read: Vec<f32> = (0..4).map(|i| tile.get(i)).collect();
        assert_eq!(read, vec![BG, 0.0, 5.0, BG]);
    }

    #[test]
    fn test_fresh_tile_reads_background() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(2, 8, BG);
        tile.load(&disk, &stats);
        assert!(!tile.is_dirty());
        assert!((0..8).all(|i| tile.get(i) == BG));
        assert_eq!(tile.get(100), BG);
    }

    #[test]
    fn test_out_of_range_set_is_noop() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(3, 2, 0.0);
        tile.load(&disk, &stats);
        tile.set(2, 1.0);
        assert!(!tile.is_dirty());
        tile.set_slice(1, &[1.0, 2.0]);
        assert!(!tile.is_dirty());
    }

    #[test]
    fn test_set_slice() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(4, 6, BG);
        tile.load(&disk, &stats);
        tile.set_slice(2, &[0.0, BG, 7.0]);
        assert_eq!(tile.get(1), BG);
        assert_eq!(tile.get(2), 0.0);
        assert_eq!(tile.get(3), BG);
        assert_eq!(tile.get(4), 7.0);
        assert!(tile.is_dirty());
    }

    #[test]
    fn test_evict_and_rehydrate() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(5, 4, BG);
        tile.load(&disk, &stats);
        tile.set(0, 0.0);
        tile.set(1, 3.5);
        tile.set(3, BG);
        assert!(tile.evict(&disk, &stats));
        assert!(tile.is_evicted());
        assert_eq!(tile.try_get(0), Access::Retired);
        assert_eq!(tile.try_set(0, 1.0), Access::Retired);

        let revived = Tile::new(5, 4, BG);
        revived.load(&disk, &stats);
        assert!(revived.was_loaded_from_disk());
        assert_eq!(revived.get(0), 0.0);
        assert_eq!(revived.get(1), 3.5);
        assert_eq!(revived.get(2), BG);
        assert_eq!(revived.get(3), BG);

        let snap = stats.snapshot();
        assert_eq!(snap.live_bytes, 16);
        assert_eq!(snap.tiles_written, 1);
        assert_eq!(snap.tiles_hydrated, 1);
    }

    #[test]
    fn test_clean_rehydrated_tile_skips_write() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(6, 4, 0.0);
        tile.load(&disk, &stats);
        tile.set(0, 1.0);
        tile.evict(&disk, &stats);

        let revived = Tile::new(6, 4, 0.0);
        revived.load(&disk, &stats);
        revived.evict(&disk, &stats);

        let snap = stats.snapshot();
        assert_eq!(snap.tiles_written, 1);
        assert_eq!(snap.writes_skipped, 1);
        assert_eq!(disk.stats().total_writes, 1);
    }

    #[test]
    fn test_failed_tile_degrades() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(7, usize::MAX / 2, BG);
        assert!(!tile.load(&disk, &stats));
        assert!(tile.is_failed());
        assert!(!tile.load(&disk, &stats));

        tile.set(0, 1.0);
        assert_eq!(tile.get(0), BG);
        assert!(tile.evict(&disk, &stats));
        assert!(stats.snapshot().failed_bytes > 0);
    }

    #[test]
    fn test_with_raw() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(8, 3, 0.0);
        assert_eq!(tile.with_raw(|b| b.len()), None);
        tile.load(&disk, &stats);
        tile.set(1, 2.0);
        assert_eq!(tile.with_raw(|b| b.iter().sum::<f32>()), Some(2.0));
    }

    #[test]
    fn test_discard_skips_write() {
        let (_tmp, disk, stats) = fixtures();
        let tile = Tile::new(9, 4, 0.0);
        tile.load(&disk, &stats);
        tile.with_raw_mut(|b| b[0] = 3.0);
        assert!(tile.is_dirty());
        tile.discard(&stats);
        assert!(tile.is_evicted());
        assert_eq!(stats.snapshot().live_bytes, 0);
        assert_eq!(disk.stats().total_writes, 0);
    }
}
