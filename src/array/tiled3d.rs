//! 3D volume paged through the tile store.
//!
//! Each depth index is a plane cut into square tiles the same way as
//! [`TiledArray2D`](crate::array::tiled2d::TiledArray2D); a tile is one
//! `side × side` patch at a single z.

use tracing::warn;

use crate::array::Array3D;
use crate::cache::store::SharedStore;
use crate::cache::tile::TileId;

pub struct TiledArray3D {
    store: SharedStore,
    width: usize,
    height: usize,
    depth: usize,
    background: f32,
    side: usize,
    tile_columns: usize,
    tiles_per_plane: usize,
    base: TileId,
}

impl TiledArray3D {
    pub fn new(store: SharedStore, width: usize, height: usize, depth: usize, background: f32) -> Self {
        let side = store.config().arrays.tile_side;
        Self::with_side(store, width, height, depth, background, side)
    }

    pub fn with_side(
        store: SharedStore,
        width: usize,
        height: usize,
        depth: usize,
        background: f32,
        side: usize,
    ) -> Self {
        let side = side.max(1);
        let tile_columns = width / side + 1;
        let tiles_per_plane = tile_columns * (height / side + 1);
        let base = store.reserve_id_range((tiles_per_plane * depth) as u64);
        Self {
            store,
            width,
            height,
            depth,
            background,
            side,
            tile_columns,
            tiles_per_plane,
            base,
        }
    }

    fn locate(&self, x: usize, y: usize, z: usize) -> Option<(TileId, usize)> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        let tile = z * self.tiles_per_plane + (y / self.side) * self.tile_columns + x / self.side;
        let local = (y % self.side) * self.side + x % self.side;
        Some((self.base + tile as u64, local))
    }
}

impl Array3D for TiledArray3D {
    fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        match self.locate(x, y, z) {
            Some((id, local)) => {
                self.store
                    .read_value(id, self.side * self.side, self.background, local)
            }
            None => self.background,
        }
    }

    fn set(&self, x: usize, y: usize, z: usize, value: f32) {
        match self.locate(x, y, z) {
            Some((id, local)) => {
                self.store
                    .write_value(id, self.side * self.side, self.background, local, value)
            }
            None => warn!(x, y, z, "Volume index out of bounds"),
        }
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn background(&self) -> f32 {
        self.background
    }
}

impl Drop for TiledArray3D {
    fn drop(&mut self) {
        let count = (self.tiles_per_plane * self.depth) as u64;
        self.store.discard_range(self.base..self.base + count);
    }
}
