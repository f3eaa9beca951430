//! tile-pager: disk-backed paging of large f32 arrays.
//!
//! Arrays are split into fixed-size tiles. A bounded number of tiles stay
//! resident in RAM; the least recently used ones are serialized into a private
//! directory and transparently restored on the next access:
//!   1D / 2D / 3D view → tile id → recency cache (RAM) → tile file (disk)

pub mod array;
pub mod cache;
pub mod config;
pub mod transfer;
