//! Upload staging array.
//!
//! A 1D array kept in a single tile so a renderer can hand the whole buffer
//! to an upload call. A producer brackets its fill with `begin`/`end`, which
//! checks the tile out so the fill cannot be evicted halfway. A reader on
//! another thread may call [`StagingArray1D::with_raw_buffer`] mid-fill and
//! sees a consistent, possibly partial, buffer.
//!
//! The raw buffer holds codec-encoded values; staging arrays are normally
//! built with a zero background, which leaves values untouched.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::array::Array1D;
use crate::cache::store::SharedStore;
use crate::cache::tile::{Tile, TileId};

/// Attempts at reaching a tile that keeps being evicted before it can be read.
const RAW_ATTEMPTS: usize = 4;

pub struct StagingArray1D {
    store: SharedStore,
    len: usize,
    background: f32,
    id: TileId,
    /// The checked-out tile while a fill is in progress.
    working: Mutex<Option<Arc<Tile>>>,
}

impl StagingArray1D {
    pub fn new(store: SharedStore, len: usize, background: f32) -> Self {
        let id = store.reserve_id();
        Self {
            store,
            len,
            background,
            id,
            working: Mutex::new(None),
        }
    }

    pub fn tile_id(&self) -> TileId {
        self.id
    }

    fn working(&self) -> Option<Arc<Tile>> {
        self.working.lock().clone()
    }

    /// Run `f` over the raw tile buffer while holding the tile lock.
    ///
    /// None if the buffer could not be allocated.
    pub fn with_raw_buffer<R>(&self, f: impl FnOnce(&[f32]) -> R) -> Option<R> {
        if let Some(tile) = self.working() {
            return tile.with_raw(f);
        }
        let mut f = Some(f);
        for _ in 0..RAW_ATTEMPTS {
            let tile = self.store.get_tile(self.id, self.len, self.background);
            if tile.is_failed() {
                return None;
            }
            if let Some(result) = tile.with_raw(|raw| f.take().map(|f| f(raw))) {
                return result;
            }
        }
        warn!(tile_id = self.id, "Staging tile kept being evicted");
        None
    }
}

impl Array1D for StagingArray1D {
    fn get(&self, index: usize) -> f32 {
        match self.working() {
            Some(tile) => tile.get(index),
            None => self
                .store
                .read_value(self.id, self.len, self.background, index),
        }
    }

    fn set(&self, index: usize, value: f32) {
        match self.working() {
            Some(tile) => tile.set(index, value),
            None => self
                .store
                .write_value(self.id, self.len, self.background, index, value),
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn background(&self) -> f32 {
        self.background
    }

    fn set_slice(&self, index: usize, values: &[f32]) -> usize {
        match self.working() {
            Some(tile) => tile.set_slice(index, values),
            None => self
                .store
                .write_slice(self.id, self.len, self.background, index, values),
        }
        index + values.len()
    }

    fn begin(&self) {
        let mut working = self.working.lock();
        if working.is_none() {
            *working = Some(self.store.check_out(self.id, self.len, self.background));
        }
    }

    fn end(&self) {
        if let Some(tile) = self.working.lock().take() {
            self.store.check_in(self.id, tile);
        }
    }
}

impl Drop for StagingArray1D {
    fn drop(&mut self) {
        if let Some(tile) = self.working.get_mut().take() {
            self.store.check_in(self.id, tile);
        }
        self.store.discard_range(self.id..self.id + 1);
    }
}
