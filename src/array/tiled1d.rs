//! 1D array paged through the tile store.
//!
//! Index `i` lives in tile `base + i / tile_size` at offset `i % tile_size`.
//! `begin`/`end` pin the tile currently being written.

use parking_lot::Mutex;
use tracing::warn;

use crate::array::batch::BatchSession;
use crate::array::Array1D;
use crate::cache::store::SharedStore;
use crate::cache::tile::TileId;

pub struct TiledArray1D {
    store: SharedStore,
    len: usize,
    background: f32,
    tile_size: usize,
    tile_count: u64,
    base: TileId,
    batch: Mutex<Option<BatchSession>>,
}

impl TiledArray1D {
    /// Tiles use the store's recommended size, shrunk to `len` for short arrays.
    pub fn new(store: SharedStore, len: usize, background: f32) -> Self {
        let tile_size = store.recommended_tile_size().min(len).max(1);
        Self::with_tile_size(store, len, background, tile_size)
    }

    pub fn with_tile_size(store: SharedStore, len: usize, background: f32, tile_size: usize) -> Self {
        let tile_size = tile_size.max(1);
        let tile_count = len.div_ceil(tile_size) as u64;
        let base = store.reserve_id_range(tile_count);
        Self {
            store,
            len,
            background,
            tile_size,
            tile_count,
            base,
            batch: Mutex::new(None),
        }
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn tile_count(&self) -> u64 {
        self.tile_count
    }

    fn locate(&self, index: usize) -> (TileId, usize) {
        (
            self.base + (index / self.tile_size) as u64,
            index % self.tile_size,
        )
    }
}

impl Array1D for TiledArray1D {
    fn get(&self, index: usize) -> f32 {
        if index >= self.len {
            return self.background;
        }
        let (id, local) = self.locate(index);
        self.store
            .read_value(id, self.tile_size, self.background, local)
    }

    fn set(&self, index: usize, value: f32) {
        if index >= self.len {
            warn!(index, len = self.len, "Tiled array index out of bounds");
            return;
        }
        let (id, local) = self.locate(index);
        if let Some(session) = self.batch.lock().as_mut() {
            if let Some(tile) = session.tile(id, 0) {
                tile.set(local, value);
                return;
            }
        }
        self.store
            .write_value(id, self.tile_size, self.background, local, value);
    }

    fn len(&self) -> usize {
        self.len
    }

    fn background(&self) -> f32 {
        self.background
    }

    fn set_slice(&self, index: usize, values: &[f32]) -> usize {
        let end = index.saturating_add(values.len());
        if end > self.len {
            warn!(index, count = values.len(), len = self.len, "Tiled array slice out of bounds");
            return end;
        }
        // Split the run at tile boundaries.
        let mut batch = self.batch.lock();
        let mut at = index;
        while at < end {
            let (id, local) = self.locate(at);
            let take = (self.tile_size - local).min(end - at);
            let run = &values[at - index..at - index + take];
            match batch.as_mut().and_then(|session| session.tile(id, 0)) {
                Some(tile) => tile.set_slice(local, run),
                None => self
                    .store
                    .write_slice(id, self.tile_size, self.background, local, run),
            }
            at += take;
        }
        end
    }

    fn begin(&self) {
        let mut batch = self.batch.lock();
        if batch.is_none() {
            *batch = Some(BatchSession::new(
                self.store.clone(),
                self.tile_size,
                self.background,
                1,
            ));
        }
    }

    fn end(&self) {
        // Dropping the session checks the pinned tile back in.
        self.batch.lock().take();
    }
}

impl Drop for TiledArray1D {
    fn drop(&mut self) {
        self.batch.get_mut().take();
        self.store.discard_range(self.base..self.base + self.tile_count);
    }
}
