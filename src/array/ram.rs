//! Arrays held entirely in RAM.
//!
//! Only for extents that comfortably fit. If the buffer cannot be allocated
//! the array degrades like an unloaded tile: reads give background and writes
//! are dropped.

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::array::{Array1D, Array2D, Array3D};

/// Flat background-filled buffer shared by the RAM arrays.
struct RamBuffer {
    data: Option<RwLock<Vec<f32>>>,
    background: f32,
}

impl RamBuffer {
    fn new(len: usize, background: f32) -> Self {
        let mut data = Vec::new();
        let data = match data.try_reserve_exact(len) {
            Ok(()) => {
                data.resize(len, background);
                Some(RwLock::new(data))
            }
            Err(_) => {
                error!(floats = len, "Not enough memory for RAM array");
                None
            }
        };
        Self { data, background }
    }

    fn get(&self, index: usize) -> f32 {
        self.data
            .as_ref()
            .and_then(|d| d.read().get(index).copied())
            .unwrap_or(self.background)
    }

    fn set(&self, index: usize, value: f32) {
        let Some(data) = &self.data else {
            error!(index, "Can't set value on unallocated RAM array");
            return;
        };
        match data.write().get_mut(index) {
            Some(slot) => *slot = value,
            None => warn!(index, "RAM array index out of bounds"),
        }
    }

    fn set_slice(&self, index: usize, values: &[f32]) {
        let Some(data) = &self.data else {
            error!(index, count = values.len(), "Can't set values on unallocated RAM array");
            return;
        };
        let mut data = data.write();
        match index.checked_add(values.len()) {
            Some(end) if end <= data.len() => data[index..end].copy_from_slice(values),
            _ => warn!(index, count = values.len(), "RAM array slice out of bounds"),
        }
    }
}

/// A 1D array in RAM.
pub struct RamArray1D {
    len: usize,
    buffer: RamBuffer,
}

impl RamArray1D {
    pub fn new(len: usize, background: f32) -> Self {
        Self {
            len,
            buffer: RamBuffer::new(len, background),
        }
    }
}

impl Array1D for RamArray1D {
    fn get(&self, index: usize) -> f32 {
        self.buffer.get(index)
    }

    fn set(&self, index: usize, value: f32) {
        self.buffer.set(index, value);
    }

    fn len(&self) -> usize {
        self.len
    }

    fn background(&self) -> f32 {
        self.buffer.background
    }

    fn set_slice(&self, index: usize, values: &[f32]) -> usize {
        self.buffer.set_slice(index, values);
        index + values.len()
    }
}

/// A 2D array in RAM, stored row-major.
pub struct RamArray2D {
    width: usize,
    height: usize,
    buffer: RamBuffer,
}

impl RamArray2D {
    pub fn new(width: usize, height: usize, background: f32) -> Self {
        Self {
            width,
            height,
            buffer: RamBuffer::new(width.saturating_mul(height), background),
        }
    }

    fn offset(&self, x: usize, y: usize) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y * self.width + x)
    }
}

impl Array2D for RamArray2D {
    fn get(&self, x: usize, y: usize) -> f32 {
        match self.offset(x, y) {
            Some(i) => self.buffer.get(i),
            None => self.buffer.background,
        }
    }

    fn set(&self, x: usize, y: usize, value: f32) {
        match self.offset(x, y) {
            Some(i) => self.buffer.set(i, value),
            None => warn!(x, y, "RAM grid index out of bounds"),
        }
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn background(&self) -> f32 {
        self.buffer.background
    }
}

/// A 3D array in RAM, stored plane by plane.
pub struct RamArray3D {
    width: usize,
    height: usize,
    depth: usize,
    buffer: RamBuffer,
}

impl RamArray3D {
    pub fn new(width: usize, height: usize, depth: usize, background: f32) -> Self {
        let len = width.saturating_mul(height).saturating_mul(depth);
        Self {
            width,
            height,
            depth,
            buffer: RamBuffer::new(len, background),
        }
    }

    fn offset(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        (x < self.width && y < self.height && z < self.depth)
            .then(|| (z * self.height + y) * self.width + x)
    }
}

impl Array3D for RamArray3D {
    fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        match self.offset(x, y, z) {
            Some(i) => self.buffer.get(i),
            None => self.buffer.background,
        }
    }

    fn set(&self, x: usize, y: usize, z: usize, value: f32) {
        match self.offset(x, y, z) {
            Some(i) => self.buffer.set(i, value),
            None => warn!(x, y, z, "RAM volume index out of bounds"),
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
        self.buffer.background
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_1d() {
        let array = RamArray1D::new(4, 9.0);
        assert_eq!(array.get(0), 9.0);
        array.set(1, 0.0);
        array.set(4, 1.0);
        assert_eq!(array.get(1), 0.0);
        assert_eq!(array.get(4), 9.0);
        assert_eq!(array.set_slice(2, &[1.0, 2.0]), 4);
        assert_eq!(array.get(3), 2.0);
    }

    #[test]
    fn test_ram_2d_row_major() {
        let grid = RamArray2D::new(3, 2, 0.0);
        grid.set(2, 1, 5.0);
        assert_eq!(grid.get(2, 1), 5.0);
        assert_eq!(grid.get(1, 2), 0.0);
        grid.set(3, 0, 1.0);
        assert_eq!(grid.get(0, 1), 0.0);
        assert_eq!(grid.len(), 6);
    }

    #[test]
    fn test_ram_3d() {
        let volume = RamArray3D::new(2, 3, 4, -1.0);
        volume.set(1, 2, 3, 8.0);
        assert_eq!(volume.get(1, 2, 3), 8.0);
        assert_eq!(volume.get(1, 2, 2), -1.0);
        assert_eq!(volume.len(), 24);
    }

    #[test]
    fn test_unallocatable_ram_array_degrades() {
        let array = RamArray1D::new(usize::MAX / 2, 3.0);
        assert!(array.buffer.data.is_none());
        array.set(0, 1.0);
        assert_eq!(array.get(0), 3.0);
        assert_eq!(array.set_slice(1, &[1.0, 2.0]), 3);
        assert_eq!(array.get(2), 3.0);
    }
}
