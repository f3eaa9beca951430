//! Runtime configuration for tile-pager.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All store-related knobs (tile size, RAM capacity, backing directory, compression)
//! live here and are consumed once at store construction.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments for the demo driver.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-pager", about = "Tile paging demo: fill and sample a large grid")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Grid width in cells.
    #[arg(long, default_value_t = 4000)]
    pub width: usize,

    /// Grid height in cells.
    #[arg(long, default_value_t = 3000)]
    pub height: usize,

    /// Number of concurrent reader threads.
    #[arg(long, default_value_t = 2)]
    pub readers: usize,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backing directory and tile geometry.
    pub store: StoreConfig,

    /// RAM tile-count capacity.
    pub cache: CacheConfig,

    /// Tile file compression.
    pub compression: CompressionConfig,

    /// Array view settings.
    pub arrays: ArrayConfig,
}

/// Tile store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root under which the private tile directory is created (None = platform temp dir).
    pub temp_root: Option<PathBuf>,

    /// Prefix of the private directory name.
    pub dir_prefix: String,

    /// Attempts at finding an unused directory name before giving up.
    pub max_dir_attempts: u32,

    /// Recommended tile size in floats.
    pub tile_size: usize,

    /// Remove the private directory when the store is dropped.
    pub remove_on_shutdown: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            dir_prefix: "tilepager".to_string(),
            max_dir_attempts: 9,
            tile_size: 10_000,
            remove_on_shutdown: true,
        }
    }
}

impl StoreConfig {
    /// The directory the private tile directory is created under.
    pub fn resolved_temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Resident tile-count bounds. Invariant: min <= current <= max.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_tiles: usize,
    pub current_tiles: usize,
    pub max_tiles: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_tiles: 50,
            current_tiles: 300,
            max_tiles: 500,
        }
    }
}

/// Compression settings for tile files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Apply zstd compression when writing tiles to disk.
    pub enabled: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            zstd_level: 3,
        }
    }
}

/// Dimensional view settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Side of a square 2D tile in cells.
    pub tile_side: usize,

    /// Arrays with fewer elements than this are kept fully in RAM.
    pub ram_threshold: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            tile_side: 200,
            ram_threshold: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Upper bound on resident tile memory in bytes at the current capacity.
    pub fn max_memory_bytes(&self) -> usize {
        self.store.tile_size * std::mem::size_of::<f32>() * self.cache.current_tiles
    }
}
