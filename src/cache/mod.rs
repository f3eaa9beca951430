//! Tile caching and paging.
//!
//! This module contains the core paging data structures:
//! - [`lru`]: Bounded recency cache with eviction listeners
//! - [`codec`]: Background-relative value encoding
//! - [`tile`]: Fixed-size f32 page with its residency state
//! - [`store`]: Tile id issuing, miss handling, check-out and eviction
//! - [`stats`]: Allocation and access accounting
//! - [`compressor`]: Tile payload byte views and zstd compression

pub mod codec;
pub mod compressor;
pub mod lru;
pub mod stats;
pub mod store;
pub mod tile;
