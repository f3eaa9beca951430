//! Compression pipeline for tile files.
//!
//! Tiles are written as raw native-order f32 bytes, optionally zstd
//! compressed. Decompression reverses the pipeline.

use thiserror::Error;

use crate::config::CompressionConfig;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),

    #[error("Tile payload is {len} bytes, not a whole number of f32 values")]
    Misaligned { len: usize },
}

/// The compression engine for tile payloads.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Whether tile files should be written compressed.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// View a float buffer as its raw native-order bytes.
    pub fn as_bytes(values: &[f32]) -> &[u8] {
        bytemuck::cast_slice(values)
    }

    /// Copy raw native-order bytes into a float buffer.
    ///
    /// Copies at most `out.len()` floats; a short payload leaves the tail of
    /// `out` untouched. Returns the number of floats copied.
    pub fn copy_into(bytes: &[u8], out: &mut [f32]) -> Result<usize, CompressionError> {
        let width = std::mem::size_of::<f32>();
        if bytes.len() % width != 0 {
            return Err(CompressionError::Misaligned { len: bytes.len() });
        }
        let count = (bytes.len() / width).min(out.len());
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut out[..count]);
        dst.copy_from_slice(&bytes[..count * width]);
        Ok(count)
    }

    /// Compress data with zstd.
    pub fn zstd_compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let compressed = zstd::encode_all(data, self.config.zstd_level)?;
        Ok(compressed)
    }

    /// Decompress zstd data.
    pub fn zstd_decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let decompressed = zstd::decode_all(data)?;
        Ok(decompressed)
    }
}
