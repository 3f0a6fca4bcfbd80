//! Error types for the market data cache core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache, rate limiter and warmer
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Persistent storage failure (SQLite, disk, corruption)
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Value does not fit in the tier at all
    #[error("Value for key '{key}' is {size} bytes, larger than tier capacity of {capacity} bytes")]
    ValueTooLarge { key: String, size: u64, capacity: u64 },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Rate Limiting Errors
    // =========================================================================
    /// Honoring the rate limit would exceed the caller's patience
    #[error("Rate limit for '{api}' requires waiting {required:?}, exceeds max wait of {max_wait:?}")]
    RateLimitTimeout {
        api: String,
        required: Duration,
        max_wait: Duration,
    },

    // =========================================================================
    // Warming Errors
    // =========================================================================
    /// Upstream connector failed
    #[error("Connector '{source_name}' failed for market '{market}': {message}")]
    Connector {
        source_name: String,
        market: String,
        message: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of the persistent tier (the CacheError kind)
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Serialization(_)
                | Error::Io(_)
                | Error::CompressionFailed { .. }
                | Error::DecompressionFailed { .. }
        )
    }

    /// True for errors raised while loading or validating configuration
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::DurationParse(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Storage("disk full".into()).is_cache_error());
        assert!(Error::Serialization("bad json".into()).is_cache_error());
        assert!(!Error::Config("capacity".into()).is_cache_error());

        assert!(Error::Config("capacity".into()).is_config_error());
        assert!(Error::DurationParse("10x".into()).is_config_error());
        assert!(!Error::Internal("x".into()).is_config_error());
    }

    #[test]
    fn test_rusqlite_error_is_wrapped() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::RateLimitTimeout {
            api: "census".into(),
            required: Duration::from_secs(10),
            max_wait: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("census"));
        assert!(msg.contains("10s"));
    }
}
