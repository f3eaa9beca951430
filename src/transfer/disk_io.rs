//! Disk I/O for tile files.
//!
//! Owns the store's private backing directory and reads/writes one file per
//! tile. I/O is synchronous: callers hold the tile lock for the duration of
//! the read or write.
//!
//! File naming: `<dir>/datanodes/<tile_id>.data` for raw native-order floats,
//! with a `.zst` suffix when compressed.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::compressor::{CompressionError, Compressor};
use crate::cache::tile::TileId;

/// Subdirectory of the private directory that holds tile files.
pub const TILE_SUBDIR: &str = "datanodes";

const RAW_SUFFIX: &str = "data";
const COMPRESSED_SUFFIX: &str = "data.zst";

#[derive(Error, Debug)]
pub enum DiskIoError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    #[error("No unused directory name under {root} after {attempts} attempts")]
    DirectoryExhausted { root: PathBuf, attempts: u32 },
}

/// How a tile file was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEncoding {
    Raw,
    Zstd,
}

#[derive(Debug, Default)]
pub struct DiskIoStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
    pub compression_fallbacks: AtomicU64,
}

/// Plain copy of [`DiskIoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIoSnapshot {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    pub compression_fallbacks: u64,
}

/// Disk I/O engine for reading and writing tiles.
#[derive(Debug)]
pub struct TileDisk {
    /// The private directory created for this store.
    root: PathBuf,

    /// `root/datanodes`.
    tile_dir: PathBuf,

    compressor: Compressor,

    stats: DiskIoStats,
}

/// Create a uniquely named directory under `parent`.
///
/// The name is `<prefix>-<unix seconds>-<pid>`, with an attempt counter
/// appended on collision. Gives up after `max_attempts`.
pub fn create_unique_dir(
    parent: &Path,
    prefix: &str,
    max_attempts: u32,
) -> Result<PathBuf, DiskIoError> {
    fs::create_dir_all(parent)?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let pid = std::process::id();

    for attempt in 1..=max_attempts {
        let extra = if attempt == 1 {
            String::new()
        } else {
            format!("-{attempt}")
        };
        let candidate = parent.join(format!("{prefix}-{stamp}-{pid}{extra}"));
        debug!(path = %candidate.display(), attempt, "Trying to create tile directory");

        // Fails on an existing name, so racing stores never share a directory.
        match fs::create_dir(&candidate) {
            Ok(()) => {
                info!(path = %candidate.display(), "Created tile directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(DiskIoError::DirectoryExhausted {
        root: parent.to_path_buf(),
        attempts: max_attempts,
    })
}

impl TileDisk {
    /// Create a fresh private directory under `parent` and prepare it for tiles.
    pub fn create(
        parent: &Path,
        prefix: &str,
        max_attempts: u32,
        compressor: Compressor,
    ) -> Result<Self, DiskIoError> {
        let root = create_unique_dir(parent, prefix, max_attempts)?;
        let tile_dir = root.join(TILE_SUBDIR);
        fs::create_dir_all(&tile_dir)?;

        Ok(Self {
            root,
            tile_dir,
            compressor,
            stats: DiskIoStats::default(),
        })
    }

    /// The private directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a tile's file in the given encoding.
    pub fn tile_path(&self, tile_id: TileId, encoding: TileEncoding) -> PathBuf {
        let suffix = match encoding {
            TileEncoding::Raw => RAW_SUFFIX,
            TileEncoding::Zstd => COMPRESSED_SUFFIX,
        };
        self.tile_dir.join(format!("{tile_id}.{suffix}"))
    }

    /// Write a tile's floats to disk.
    ///
    /// Compressed when enabled; if the compressed write fails the tile is
    /// written raw instead. The file is written under a temporary name and
    /// renamed into place, and the other encoding's file is removed so a later
    /// read never picks up stale data.
    pub fn write_tile(&self, tile_id: TileId, values: &[f32]) -> Result<PathBuf, DiskIoError> {
        let bytes = Compressor::as_bytes(values);

        let (path, written) = if self.compressor.enabled() {
            match self.write_compressed(tile_id, bytes) {
                Ok(done) => done,
                Err(e) => {
                    warn!(tile_id, error = %e, "Compressed tile write failed, writing raw");
                    self.stats
                        .compression_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                    self.write_raw(tile_id, bytes)?
                }
            }
        } else {
            self.write_raw(tile_id, bytes)?
        };

        debug!(
            tile_id,
            path = %path.display(),
            size = written,
            "Wrote tile to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(written as u64, Ordering::Relaxed);

        Ok(path)
    }

    fn write_compressed(
        &self,
        tile_id: TileId,
        bytes: &[u8],
    ) -> Result<(PathBuf, usize), DiskIoError> {
        let compressed = self.compressor.zstd_compress(bytes)?;
        let path = self.tile_path(tile_id, TileEncoding::Zstd);
        replace_file(&path, &compressed)?;
        remove_if_present(&self.tile_path(tile_id, TileEncoding::Raw))?;
        Ok((path, compressed.len()))
    }

    fn write_raw(&self, tile_id: TileId, bytes: &[u8]) -> Result<(PathBuf, usize), DiskIoError> {
        let path = self.tile_path(tile_id, TileEncoding::Raw);
        replace_file(&path, bytes)?;
        remove_if_present(&self.tile_path(tile_id, TileEncoding::Zstd))?;
        Ok((path, bytes.len()))
    }

    /// Read a tile's floats into `out`.
    ///
    /// Tries the compressed file first, then the raw one. Returns `Ok(None)`
    /// when neither exists: the tile was never persisted.
    pub fn read_tile(
        &self,
        tile_id: TileId,
        out: &mut [f32],
    ) -> Result<Option<TileEncoding>, DiskIoError> {
        let (bytes, encoding) = match fs::read(self.tile_path(tile_id, TileEncoding::Zstd)) {
            Ok(data) => (self.compressor.zstd_decompress(&data)?, TileEncoding::Zstd),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match fs::read(self.tile_path(tile_id, TileEncoding::Raw)) {
                    Ok(data) => (data, TileEncoding::Raw),
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let copied = Compressor::copy_into(&bytes, out)?;
        if copied != out.len() {
            warn!(tile_id, expected = out.len(), found = copied, "Tile file size mismatch");
        }

        debug!(tile_id, size = bytes.len(), encoding = ?encoding, "Read tile from disk");

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        Ok(Some(encoding))
    }

    /// Delete both encodings of a tile's file.
    pub fn delete_tile(&self, tile_id: TileId) -> Result<(), DiskIoError> {
        remove_if_present(&self.tile_path(tile_id, TileEncoding::Zstd))?;
        remove_if_present(&self.tile_path(tile_id, TileEncoding::Raw))?;
        Ok(())
    }

    /// Total bytes of tile files currently on disk.
    pub fn disk_usage(&self) -> Result<u64, DiskIoError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.tile_dir)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Get disk I/O statistics.
    pub fn stats(&self) -> DiskIoSnapshot {
        DiskIoSnapshot {
            total_writes: self.stats.total_writes.load(Ordering::Relaxed),
            total_reads: self.stats.total_reads.load(Ordering::Relaxed),
            total_bytes_written: self.stats.total_bytes_written.load(Ordering::Relaxed),
            total_bytes_read: self.stats.total_bytes_read.load(Ordering::Relaxed),
            compression_fallbacks: self.stats.compression_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Remove the private directory and everything in it.
    pub fn remove_all(&self) -> Result<(), DiskIoError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `data` to a sibling temp file, then rename it over `path`.
fn replace_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;
    use tempfile::TempDir;

    fn disk(tmp: &TempDir, compress: bool) -> TileDisk {
        let compressor = Compressor::new(CompressionConfig {
            enabled: compress,
            ..Default::default()
        });
        TileDisk::create(tmp.path(), "test", 9, compressor).unwrap()
    }

    #[test]
    fn test_write_and_read_tile() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, true);

        let data = vec![42.0f32; 1024];
        let path = disk.write_tile(0, &data).unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".data.zst"));

        let mut read = vec![0.0f32; 1024];
        let encoding = disk.read_tile(0, &mut read).unwrap();
        assert_eq!(encoding, Some(TileEncoding::Zstd));
        assert_eq!(read, data);
    }

    #[test]
    fn test_raw_when_compression_disabled() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, false);

        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let path = disk.write_tile(7, &data).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 64);

        let mut read = vec![0.0f32; 16];
        assert_eq!(disk.read_tile(7, &mut read).unwrap(), Some(TileEncoding::Raw));
        assert_eq!(read, data);
    }

    #[test]
    fn test_missing_tile_is_none() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, true);
        let mut read = vec![0.0f32; 4];
        assert_eq!(disk.read_tile(99, &mut read).unwrap(), None);
    }

    #[test]
    fn test_delete_tile() {
        let tmp = TempDir::new().unwrap();
        let raw = disk(&tmp, false);
        raw.write_tile(3, &[1.0, 2.0]).unwrap();
        assert!(raw.tile_path(3, TileEncoding::Raw).exists());

        raw.delete_tile(3).unwrap();
        assert!(!raw.tile_path(3, TileEncoding::Raw).exists());
        let mut read = vec![0.0f32; 2];
        assert_eq!(raw.read_tile(3, &mut read).unwrap(), None);
    }

    #[test]
    fn test_compressed_write_failure_falls_back_to_raw() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, true);

        // A directory squatting on the compressed temp name makes that write fail.
        let blocker = disk.tile_path(6, TileEncoding::Zstd).with_extension("tmp");
        fs::create_dir(&blocker).unwrap();

        let data: Vec<f32> = (0..32).map(|i| i as f32 * 0.5).collect();
        let path = disk.write_tile(6, &data).unwrap();
        assert_eq!(path, disk.tile_path(6, TileEncoding::Raw));
        assert!(!disk.tile_path(6, TileEncoding::Zstd).exists());

        let stats = disk.stats();
        assert_eq!(stats.compression_fallbacks, 1);
        assert_eq!(stats.total_writes, 1);

        let mut read = vec![0.0f32; 32];
        assert_eq!(disk.read_tile(6, &mut read).unwrap(), Some(TileEncoding::Raw));
        assert_eq!(read, data);
    }

    #[test]
    fn test_write_fails_when_both_encodings_fail() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, true);
        for encoding in [TileEncoding::Zstd, TileEncoding::Raw] {
            fs::create_dir(disk.tile_path(2, encoding).with_extension("tmp")).unwrap();
        }

        assert!(disk.write_tile(2, &[1.0, 2.0]).is_err());
        let stats = disk.stats();
        assert_eq!(stats.compression_fallbacks, 1);
        assert_eq!(stats.total_writes, 0);
    }

    #[test]
    fn test_unique_dir_collision_retry() {
        let tmp = TempDir::new().unwrap();
        let a = create_unique_dir(tmp.path(), "dup", 9).unwrap();
        let b = create_unique_dir(tmp.path(), "dup", 9).unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }

    #[test]
    fn test_unique_dir_exhaustion() {
        let tmp = TempDir::new().unwrap();
        create_unique_dir(tmp.path(), "one", 1).unwrap();
        // Same second, same pid, single attempt: the only candidate is taken.
        let second = create_unique_dir(tmp.path(), "one", 1);
        if let Err(e) = second {
            assert!(matches!(e, DiskIoError::DirectoryExhausted { attempts: 1, .. }));
        }
    }

    #[test]
    fn test_remove_all() {
        let tmp = TempDir::new().unwrap();
        let disk = disk(&tmp, true);
        disk.write_tile(1, &[1.0]).unwrap();
        disk.remove_all().unwrap();
        assert!(!disk.root().exists());
        disk.remove_all().unwrap();
    }
}
