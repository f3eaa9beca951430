//! 2D grid paged through the tile store as square tiles.
//!
//! The grid is cut into `side × side` tiles (think graph paper):
//! - tile grid cell of (x, y) is (x / side, y / side)
//! - tile id is `base + tile_row * tile_columns + tile_col`
//! - offset inside the tile is `(y % side) * side + x % side`
//!
//! Square tiles suit viewers that look at a sub-rectangle of the grid.
//! Row-ordered batching pins one tile row at a time for row-major fills.

use parking_lot::Mutex;
use tracing::warn;

use crate::array::batch::BatchSession;
use crate::array::Array2D;
use crate::cache::store::SharedStore;
use crate::cache::tile::TileId;

pub struct TiledArray2D {
    store: SharedStore,
    width: usize,
    height: usize,
    background: f32,
    side: usize,
    tile_columns: usize,
    tile_rows: usize,
    base: TileId,
    batch: Mutex<Option<BatchSession>>,
}

impl TiledArray2D {
    /// Tile side comes from the store's array config.
    pub fn new(store: SharedStore, width: usize, height: usize, background: f32) -> Self {
        let side = store.config().arrays.tile_side;
        Self::with_side(store, width, height, background, side)
    }

    pub fn with_side(
        store: SharedStore,
        width: usize,
        height: usize,
        background: f32,
        side: usize,
    ) -> Self {
        let side = side.max(1);
        // One spare column/row when the extent is an exact multiple; ids are free.
        let tile_columns = width / side + 1;
        let tile_rows = height / side + 1;
        let base = store.reserve_id_range((tile_columns * tile_rows) as u64);
        Self {
            store,
            width,
            height,
            background,
            side,
            tile_columns,
            tile_rows,
            base,
            batch: Mutex::new(None),
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn tile_columns(&self) -> usize {
        self.tile_columns
    }

    pub fn tile_rows(&self) -> usize {
        self.tile_rows
    }

    fn tile_len(&self) -> usize {
        self.side * self.side
    }

    /// First id of tile row `tile_row`.
    fn row_base(&self, tile_row: usize) -> TileId {
        self.base + (tile_row * self.tile_columns) as u64
    }

    /// (tile row, tile column, local offset) of a cell.
    fn locate(&self, x: usize, y: usize) -> (usize, usize, usize) {
        let tile_col = x / self.side;
        let tile_row = y / self.side;
        let local = (y % self.side) * self.side + x % self.side;
        (tile_row, tile_col, local)
    }

    /// Tile id holding cell (x, y).
    pub fn tile_id(&self, x: usize, y: usize) -> TileId {
        let (tile_row, tile_col, _) = self.locate(x, y);
        self.row_base(tile_row) + tile_col as u64
    }

    fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }
}

impl Array2D for TiledArray2D {
    fn get(&self, x: usize, y: usize) -> f32 {
        if !self.in_bounds(x, y) {
            return self.background;
        }
        let (tile_row, tile_col, local) = self.locate(x, y);
        let id = self.row_base(tile_row) + tile_col as u64;
        self.store
            .read_value(id, self.tile_len(), self.background, local)
    }

    fn set(&self, x: usize, y: usize, value: f32) {
        if !self.in_bounds(x, y) {
            warn!(x, y, width = self.width, height = self.height, "Grid index out of bounds");
            return;
        }
        let (tile_row, tile_col, local) = self.locate(x, y);
        let row_base = self.row_base(tile_row);

        if let Some(session) = self.batch.lock().as_mut() {
            if let Some(tile) = session.tile(row_base, tile_col) {
                tile.set(local, value);
                return;
            }
        }
        self.store.write_value(
            row_base + tile_col as u64,
            self.tile_len(),
            self.background,
            local,
            value,
        );
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn background(&self) -> f32 {
        self.background
    }

    fn begin_row_ordered(&self) {
        let mut batch = self.batch.lock();
        if batch.is_some() {
            return;
        }
        let mut session = BatchSession::new(
            self.store.clone(),
            self.tile_len(),
            self.background,
            self.tile_columns,
        );
        session.preload(self.row_base(0));
        *batch = Some(session);
    }

    fn end_row_ordered(&self) {
        self.batch.lock().take();
    }
}

impl Drop for TiledArray2D {
    fn drop(&mut self) {
        self.batch.get_mut().take();
        let count = (self.tile_columns * self.tile_rows) as u64;
        self.store.discard_range(self.base..self.base + count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::new_shared_store;
    use crate::config::Config;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(tmp: &TempDir, current_tiles: usize) -> SharedStore {
        let mut config = Config::default();
        config.store.temp_root = Some(tmp.path().to_path_buf());
        config.cache.min_tiles = 1;
        config.cache.current_tiles = current_tiles;
        config.cache.max_tiles = 64;
        new_shared_store(Arc::new(config)).unwrap()
    }

    #[test]
    fn test_tile_geometry() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 8);
        let grid = TiledArray2D::with_side(store, 375, 240, 0.0, 200);
        assert_eq!(grid.tile_columns(), 2);
        assert_eq!(grid.tile_rows(), 2);
        assert_eq!(grid.tile_id(0, 0), grid.base);
        assert_eq!(grid.tile_id(374, 0), grid.base + 1);
        assert_eq!(grid.tile_id(0, 239), grid.base + 2);
        assert_eq!(grid.tile_id(374, 239), grid.base + 3);
        assert_eq!(grid.locate(201, 3), (0, 1, 3 * 200 + 1));
    }

    #[test]
    fn test_values_survive_eviction() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 2);
        let grid = TiledArray2D::with_side(store.clone(), 30, 30, -1.0, 10);
        for y in 0..30 {
            for x in 0..30 {
                grid.set(x, y, (y * 30 + x) as f32);
            }
        }
        assert!(store.stats().tiles_written > 0);
        for y in 0..30 {
            for x in 0..30 {
                assert_eq!(grid.get(x, y), (y * 30 + x) as f32);
            }
        }
        assert_eq!(grid.get(30, 0), -1.0);
    }

    #[test]
    fn test_row_ordered_batch_swaps_rows() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 2);
        let grid = TiledArray2D::with_side(store.clone(), 25, 25, 0.0, 10);
        grid.begin_row_ordered();
        // Preloaded tile row 0 is checked out even past the cache capacity.
        for col in 0..grid.tile_columns() {
            assert!(store.is_checked_out(grid.base + col as u64));
        }
        grid.set(24, 12, 3.0);
        assert!(!store.is_checked_out(grid.base));
        assert!(store.is_checked_out(grid.row_base(1) + 2));
        assert_eq!(grid.get(24, 12), 3.0);
        grid.end_row_ordered();
        assert!(!store.is_checked_out(grid.row_base(1) + 2));
        assert_eq!(grid.get(24, 12), 3.0);
    }

    #[test]
    fn test_out_of_order_writes_during_batch() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp, 4);
        let grid = TiledArray2D::with_side(store, 20, 20, 0.0, 10);
        grid.begin_row_ordered();
        grid.set(1, 15, 1.0);
        grid.set(1, 1, 2.0);
        grid.set(19, 19, 3.0);
        grid.end_row_ordered();
        assert_eq!(grid.get(1, 15), 1.0);
        assert_eq!(grid.get(1, 1), 2.0);
        assert_eq!(grid.get(19, 19), 3.0);
    }
}
