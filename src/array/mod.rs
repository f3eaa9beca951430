//! Dimensional views over RAM and tile-backed storage.
//!
//! Callers work against the [`Array1D`], [`Array2D`] and [`Array3D`] traits and
//! never see the backing representation:
//! - [`ram`]: plain in-memory arrays for small extents
//! - [`tiled1d`], [`tiled2d`], [`tiled3d`]: arrays paged through the tile store
//! - [`staging`]: single-tile array exposing its raw buffer for upload
//! - [`batch`]: pinned runs of checked-out tiles for bulk writes
//!
//! All views take `&self` and are safe to share between a writer and readers.

pub mod batch;
pub mod ram;
pub mod staging;
pub mod tiled1d;
pub mod tiled2d;
pub mod tiled3d;

use crate::cache::store::SharedStore;
use crate::config::ArrayConfig;

use ram::{RamArray1D, RamArray2D, RamArray3D};
use staging::StagingArray1D;
use tiled1d::TiledArray1D;
use tiled2d::TiledArray2D;
use tiled3d::TiledArray3D;

/// A one-dimensional float array.
pub trait Array1D: Send + Sync {
    /// Value at `index`; background if out of range.
    fn get(&self, index: usize) -> f32;

    /// Store `value` at `index`; out of range is logged and ignored.
    fn set(&self, index: usize, value: f32);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn background(&self) -> f32;

    /// Store a run of values starting at `index`. Returns the index after the run.
    fn set_slice(&self, index: usize, values: &[f32]) -> usize {
        for (offset, &value) in values.iter().enumerate() {
            self.set(index + offset, value);
        }
        index + values.len()
    }

    /// Start a bulk write. Optional; only changes speed.
    fn begin(&self) {}

    /// Finish a bulk write started with [`Array1D::begin`].
    fn end(&self) {}
}

/// A two-dimensional float array addressed as (x, y).
pub trait Array2D: Send + Sync {
    fn get(&self, x: usize, y: usize) -> f32;

    fn set(&self, x: usize, y: usize, value: f32);

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn len(&self) -> usize {
        self.width() * self.height()
    }

    fn background(&self) -> f32;

    /// Start a bulk write that visits cells in row-major order
    /// (`for y { for x { set(x, y, ..) } }`). Other orders still work, only slower.
    fn begin_row_ordered(&self) {}

    fn end_row_ordered(&self) {}

    /// The row at constant `y` as a 1D view.
    fn row(&self, y: usize) -> LineView<'_>
    where
        Self: Sized,
    {
        LineView::row(self, y)
    }

    /// The column at constant `x` as a 1D view.
    fn column(&self, x: usize) -> LineView<'_>
    where
        Self: Sized,
    {
        LineView::column(self, x)
    }
}

/// A three-dimensional float array addressed as (x, y, z).
pub trait Array3D: Send + Sync {
    fn get(&self, x: usize, y: usize, z: usize) -> f32;

    fn set(&self, x: usize, y: usize, z: usize, value: f32);

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn depth(&self) -> usize;

    fn len(&self) -> usize {
        self.width() * self.height() * self.depth()
    }

    fn background(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Row,
    Column,
}

/// A row or column of a 2D array, viewed as 1D.
pub struct LineView<'a> {
    grid: &'a dyn Array2D,
    axis: Axis,
    fixed: usize,
}

impl<'a> LineView<'a> {
    pub fn row(grid: &'a dyn Array2D, y: usize) -> Self {
        Self {
            grid,
            axis: Axis::Row,
            fixed: y,
        }
    }

    pub fn column(grid: &'a dyn Array2D, x: usize) -> Self {
        Self {
            grid,
            axis: Axis::Column,
            fixed: x,
        }
    }
}

impl Array1D for LineView<'_> {
    fn get(&self, index: usize) -> f32 {
        match self.axis {
            Axis::Row => self.grid.get(index, self.fixed),
            Axis::Column => self.grid.get(self.fixed, index),
        }
    }

    fn set(&self, index: usize, value: f32) {
        match self.axis {
            Axis::Row => self.grid.set(index, self.fixed, value),
            Axis::Column => self.grid.set(self.fixed, index, value),
        }
    }

    fn len(&self) -> usize {
        match self.axis {
            Axis::Row => self.grid.width(),
            Axis::Column => self.grid.height(),
        }
    }

    fn background(&self) -> f32 {
        self.grid.background()
    }
}

/// Storage behind an array view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Whole array in RAM.
    Ram,
    /// Paged through the tile store.
    Tiled,
    /// One tile-store tile with a raw buffer for upload (1D only).
    Staging,
}

impl Backing {
    /// RAM for arrays smaller than the configured threshold, tiles otherwise.
    pub fn select(len: usize, config: &ArrayConfig) -> Self {
        if len < config.ram_threshold {
            Backing::Ram
        } else {
            Backing::Tiled
        }
    }
}

/// Build a 1D array with an explicit backing.
pub fn new_array_1d(
    store: &SharedStore,
    len: usize,
    background: f32,
    backing: Backing,
) -> Box<dyn Array1D> {
    match backing {
        Backing::Ram => Box::new(RamArray1D::new(len, background)),
        Backing::Tiled => Box::new(TiledArray1D::new(store.clone(), len, background)),
        Backing::Staging => Box::new(StagingArray1D::new(store.clone(), len, background)),
    }
}

/// Build a 2D array, choosing the backing from its size.
pub fn new_array_2d(
    store: &SharedStore,
    width: usize,
    height: usize,
    background: f32,
) -> Box<dyn Array2D> {
    match Backing::select(width.saturating_mul(height), &store.config().arrays) {
        Backing::Ram => Box::new(RamArray2D::new(width, height, background)),
        _ => Box::new(TiledArray2D::new(store.clone(), width, height, background)),
    }
}

/// Build a 3D array, choosing the backing from its size.
pub fn new_array_3d(
    store: &SharedStore,
    width: usize,
    height: usize,
    depth: usize,
    background: f32,
) -> Box<dyn Array3D> {
    let len = width.saturating_mul(height).saturating_mul(depth);
    match Backing::select(len, &store.config().arrays) {
        Backing::Ram => Box::new(RamArray3D::new(width, height, depth, background)),
        _ => Box::new(TiledArray3D::new(store.clone(), width, height, depth, background)),
    }
}
