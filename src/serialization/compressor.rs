// src/serialization/compressor.rs
//! zstd compression for checkpoint payloads
//!
//! Object state and message logs are JSON, which compresses well; the
//! SQLite recovery server and [`ZstdCodec`](super::ZstdCodec) both go
//! through here.

use crate::utils::errors::{ActiveError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionLevel {
    /// Level 1, for checkpoints shipped on the serving path
    Fast,

    /// Level 3
    Balanced,

    /// Level 19, for archival stores
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Compressor using zstd
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = zstd::encode_all(data, self.level.as_i32()).map_err(|e| {
            ActiveError::CompressionFailed(format!("Compression error: {}", e))
        })?;

        debug!(
            "Compressed {} bytes -> {} bytes at level {}",
            data.len(),
            compressed.len(),
            self.level.as_i32()
        );
        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| {
            ActiveError::CompressionFailed(format!("Decompression error: {}", e))
        })
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::Fast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress() {
        let compressor = Compressor::new(CompressionLevel::Balanced);
        let data = br#"{"count":3,"history":[1,2,3]}"#.repeat(50);

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let compressor = Compressor::default();
        assert!(matches!(
            compressor.decompress(b"not zstd"),
            Err(ActiveError::CompressionFailed(_))
        ));
    }
}
