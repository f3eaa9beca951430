//! Batch sessions: a pinned run of checked-out tiles for bulk writes.
//!
//! A session holds `run_len` consecutive tile ids checked out of the store.
//! Asking for a tile in a different run checks the current run back in and
//! checks the new one out, so a row-major fill touches the cache once per
//! tile row instead of once per cell.

use std::sync::Arc;

use tracing::debug;

use crate::cache::store::SharedStore;
use crate::cache::tile::{Tile, TileId};

pub struct BatchSession {
    store: SharedStore,
    tile_size: usize,
    background: f32,
    run_len: usize,
    /// First id of the pinned run, if any.
    first: Option<TileId>,
    tiles: Vec<Arc<Tile>>,
}

impl BatchSession {
    pub fn new(store: SharedStore, tile_size: usize, background: f32, run_len: usize) -> Self {
        Self {
            store,
            tile_size,
            background,
            run_len,
            first: None,
            tiles: Vec::with_capacity(run_len),
        }
    }

    /// Check out the run starting at `first` ahead of any write.
    pub fn preload(&mut self, first: TileId) {
        if self.first != Some(first) {
            self.release();
            self.pin(first);
        }
    }

    /// The tile at `offset` within the run starting at `first`.
    ///
    /// Swaps the pinned run if `first` differs from it. None if `offset` is
    /// outside the run.
    pub fn tile(&mut self, first: TileId, offset: usize) -> Option<&Arc<Tile>> {
        self.preload(first);
        self.tiles.get(offset)
    }

    fn pin(&mut self, first: TileId) {
        for offset in 0..self.run_len {
            let id = first + offset as u64;
            self.tiles
                .push(self.store.check_out(id, self.tile_size, self.background));
        }
        self.first = Some(first);
        debug!(first, count = self.run_len, "Pinned tile run");
    }

    /// Check every pinned tile back in.
    pub fn release(&mut self) {
        let Some(first) = self.first.take() else {
            return;
        };
        for (offset, tile) in self.tiles.drain(..).enumerate() {
            self.store.check_in(first + offset as u64, tile);
        }
    }

    /// First id of the pinned run.
    pub fn pinned(&self) -> Option<TileId> {
        self.first
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        self.release();
    }
}
