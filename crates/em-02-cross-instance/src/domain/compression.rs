//! # Envelope Compression
//!
//! Zstd compression of envelope payloads.
//!
//! - **Write path**: `zstd::encode_all(payload, level)` when the payload is
//!   above the compression threshold or the envelope exceeds its ceiling
//! - **Read path**: `zstd::decode_all(payload)` when the envelope is flagged
//!   `compressed`

use std::io;

use thiserror::Error;

// =============================================================================
// COMPRESSION CONFIGURATION
// =============================================================================

/// Configuration for payload compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Compression level (1-22, default 3)
    pub level: i32,
    /// Enable compression (can be disabled for debugging)
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 3,
            enabled: true,
        }
    }
}

// =============================================================================
// COMPRESSION ERROR
// =============================================================================

/// Errors during compression/decompression
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Compression failed: {0}")]
    CompressFailed(io::Error),
    #[error("Decompression failed: {0}")]
    DecompressFailed(io::Error),
}

// =============================================================================
// COMPRESSOR TRAIT
// =============================================================================

/// Trait for payload compression implementations
pub trait PayloadCompressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn is_enabled(&self) -> bool;
}

// =============================================================================
// ZSTD COMPRESSOR
// =============================================================================

/// Zstd-based compressor
pub struct ZstdCompressor {
    config: CompressionConfig,
}

impl ZstdCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

impl PayloadCompressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !self.config.enabled {
            return Ok(data.to_vec());
        }
        zstd::encode_all(data, self.config.level).map_err(CompressionError::CompressFailed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !self.config.enabled {
            return Ok(data.to_vec());
        }
        zstd::decode_all(data).map_err(CompressionError::DecompressFailed)
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

// =============================================================================
// NO-OP COMPRESSOR
// =============================================================================

/// Compressor that returns data unchanged
pub struct NoOpCompressor;

impl PayloadCompressor for NoOpCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_reduces_repetitive_payload() {
        let compressor = ZstdCompressor::new(CompressionConfig::default());

        let original = br#"{"pattern":"order.created","payload":{"sku":"A-1"}}"#.repeat(200);
        let compressed = compressor.compress(&original).expect("compress");

        assert!(compressed.len() < original.len() / 4);
        assert_eq!(compressor.decompress(&compressed).expect("decompress"), original);
    }

    #[test]
    fn test_disabled_compression_passthrough() {
        let compressor = ZstdCompressor::new(CompressionConfig {
            level: 3,
            enabled: false,
        });

        let original = b"Test data";
        assert_eq!(compressor.compress(original).expect("compress"), original);
        assert!(!compressor.is_enabled());
    }

    #[test]
    fn test_corrupted_input_fails_to_decompress() {
        let compressor = ZstdCompressor::new(CompressionConfig::default());
        assert!(matches!(
            compressor.decompress(b"definitely not zstd"),
            Err(CompressionError::DecompressFailed(_))
        ));
    }

    #[test]
    fn test_noop_compressor_passthrough() {
        let compressor = NoOpCompressor;
        let original = b"Test data that should not change";
        assert_eq!(compressor.compress(original).expect("compress"), original);
        assert_eq!(compressor.decompress(original).expect("decompress"), original);
    }
}
