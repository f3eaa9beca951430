//! Data transfer between RAM and the backing directory.
//!
//! - [`disk_io`]: Tile file layout, atomic writes and hydration reads

pub mod disk_io;
