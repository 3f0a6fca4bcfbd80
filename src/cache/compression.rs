//! Payload Compression
//!
//! LZ4 block compression for persistent-tier payloads, applied only above a
//! size threshold and only when it actually shrinks the payload.
//!
//! # Example
//!
//! ```
//! use market_cache::cache::compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
//!
//! let manager = CompressionManager::with_config(CompressionConfig {
//!     min_size_bytes: 16,
//!     ..Default::default()
//! });
//!
//! let data = b"median_rent median_rent median_rent median_rent median_rent";
//! let (compressed, algorithm) = manager.compress(data).unwrap();
//! assert_eq!(algorithm, CompressionAlgorithm::Lz4);
//!
//! let restored = manager.decompress(&compressed, algorithm).unwrap();
//! assert_eq!(restored.as_ref(), data);
//! ```

use bytes::Bytes;
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Stored as-is
    None,
    /// LZ4 block format with a size prefix
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// One-byte tag written ahead of stored payloads
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    /// Inverse of [`tag`](Self::tag)
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Algorithm applied to payloads at or above the threshold
    pub default_algorithm: CompressionAlgorithm,
    /// Payloads smaller than this are stored uncompressed
    pub min_size_bytes: u64,
    /// 0-9; 0 selects the fast mode, 1-9 the high-compression mode
    pub level: i32,
    /// Store uncompressed instead of failing when compression errors
    pub fallback_on_failure: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 10 * 1024,
            level: 6,
            fallback_on_failure: true,
        }
    }
}

// =============================================================================
// LZ4
// =============================================================================

fn lz4_compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let mode = if level <= 0 {
        lz4::block::CompressionMode::DEFAULT
    } else {
        lz4::block::CompressionMode::HIGHCOMPRESSION(level)
    };

    lz4::block::compress(data, Some(mode), true).map_err(|e| Error::CompressionFailed {
        algorithm: "LZ4".into(),
        reason: e.to_string(),
    })
}

fn lz4_decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
        algorithm: "LZ4".into(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Threshold-aware compressor with fallback support
#[derive(Debug, Clone, Default)]
pub struct CompressionManager {
    config: CompressionConfig,
}

impl CompressionManager {
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress using the configured algorithm
    ///
    /// Returns `(payload, algorithm_used)`. Small payloads and payloads that
    /// do not shrink come back untouched with [`CompressionAlgorithm::None`].
    /// A failed compression does too when `fallback_on_failure` is set;
    /// otherwise the error is returned.
    pub fn compress(&self, data: &[u8]) -> Result<(Bytes, CompressionAlgorithm)> {
        self.compress_using(data, lz4_compress)
    }

    fn compress_using(
        &self,
        data: &[u8],
        compressor: impl FnOnce(&[u8], i32) -> Result<Vec<u8>>,
    ) -> Result<(Bytes, CompressionAlgorithm)> {
        let algorithm = self.config.default_algorithm;
        if (data.len() as u64) < self.config.min_size_bytes
            || algorithm == CompressionAlgorithm::None
        {
            return Ok((Bytes::copy_from_slice(data), CompressionAlgorithm::None));
        }

        match compressor(data, self.config.level) {
            Ok(compressed) if compressed.len() < data.len() => {
                Ok((Bytes::from(compressed), algorithm))
            }
            Ok(_) => Ok((Bytes::copy_from_slice(data), CompressionAlgorithm::None)),
            Err(e) if self.config.fallback_on_failure => {
                warn!("Compression with {} failed, storing uncompressed: {}", algorithm, e);
                Ok((Bytes::copy_from_slice(data), CompressionAlgorithm::None))
            }
            Err(e) => Err(e),
        }
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        match algorithm {
            CompressionAlgorithm::None => Ok(Bytes::copy_from_slice(data)),
            CompressionAlgorithm::Lz4 => Ok(Bytes::from(lz4_decompress(data)?)),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive(len: usize) -> Vec<u8> {
        b"{\"median_home_value\":452000,\"state\":\"CO\"}"
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    fn manager(threshold: u64) -> CompressionManager {
        CompressionManager::with_config(CompressionConfig {
            min_size_bytes: threshold,
            ..Default::default()
        })
    }

    #[test]
    fn test_below_threshold_is_stored_plain() {
        let data = repetitive(100);
        let (out, algorithm) = manager(1024).compress(&data).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(out.as_ref(), data.as_slice());
    }

    #[test]
    fn test_above_threshold_compresses() {
        let data = repetitive(8192);
        let m = manager(1024);
        let (out, algorithm) = m.compress(&data).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::Lz4);
        assert!(out.len() < data.len());

        let restored = m.decompress(&out, algorithm).unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn test_disabled_algorithm_never_compresses() {
        let m = CompressionManager::with_config(CompressionConfig {
            default_algorithm: CompressionAlgorithm::None,
            min_size_bytes: 0,
            ..Default::default()
        });
        let (_, algorithm) = m.compress(&repetitive(4096)).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::None);
    }

    #[test]
    fn test_fast_mode_level_zero() {
        let m = CompressionManager::with_config(CompressionConfig {
            min_size_bytes: 0,
            level: 0,
            ..Default::default()
        });
        let data = repetitive(4096);
        let (out, algorithm) = m.compress(&data).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::Lz4);
        assert_eq!(m.decompress(&out, algorithm).unwrap().as_ref(), data.as_slice());
    }

    fn failing(_: &[u8], _: i32) -> Result<Vec<u8>> {
        Err(Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: "injected".into(),
        })
    }

    #[test]
    fn test_failure_falls_back_to_plain() {
        let data = repetitive(4096);
        let (out, algorithm) = manager(0).compress_using(&data, failing).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(out.as_ref(), data.as_slice());
    }

    #[test]
    fn test_failure_propagates_without_fallback() {
        let m = CompressionManager::with_config(CompressionConfig {
            min_size_bytes: 0,
            fallback_on_failure: false,
            ..Default::default()
        });
        let err = m.compress_using(&repetitive(4096), failing).unwrap_err();
        assert!(matches!(err, Error::CompressionFailed { .. }));

        // Below the threshold the compressor is never consulted
        let m = CompressionManager::with_config(CompressionConfig {
            min_size_bytes: 1 << 20,
            fallback_on_failure: false,
            ..Default::default()
        });
        assert!(m.compress_using(&repetitive(4096), failing).is_ok());
    }

    #[test]
    fn test_corrupt_payload_fails_decompression() {
        let err = manager(0)
            .decompress(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3], CompressionAlgorithm::Lz4)
            .unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed { .. }));
        assert!(err.is_cache_error());
    }

    #[test]
    fn test_tags() {
        for algorithm in [CompressionAlgorithm::None, CompressionAlgorithm::Lz4] {
            assert_eq!(CompressionAlgorithm::from_tag(algorithm.tag()), Some(algorithm));
        }
        assert_eq!(CompressionAlgorithm::from_tag(9), None);
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }
}
