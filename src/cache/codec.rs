//! Value codecs for the persistent tier
//!
//! A [`ValueCodec`] turns a cached [`Value`] into the bytes stored in the
//! `value` column and back. [`JsonCodec`] is the default;
//! [`CompressedCodec`] wraps any codec and LZ4-compresses large payloads.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use super::compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
use crate::error::{Error, Result};

/// Serializer for persisted cache values
pub trait ValueCodec: Send + Sync {
    /// Short name used in logs and stats
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Bytes>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Compact JSON encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Wraps another codec, prefixing each blob with a one-byte algorithm tag
/// followed by the (possibly compressed) inner encoding
pub struct CompressedCodec {
    inner: Arc<dyn ValueCodec>,
    compression: CompressionManager,
}

impl CompressedCodec {
    pub fn new(inner: Arc<dyn ValueCodec>, config: CompressionConfig) -> Self {
        Self {
            inner,
            compression: CompressionManager::with_config(config),
        }
    }

    /// JSON inner codec
    pub fn json(config: CompressionConfig) -> Self {
        Self::new(Arc::new(JsonCodec), config)
    }
}

impl ValueCodec for CompressedCodec {
    fn name(&self) -> &'static str {
        "compressed"
    }

    fn encode(&self, value: &Value) -> Result<Bytes> {
        let raw = self.inner.encode(value)?;
        let (payload, algorithm) = self.compression.compress(&raw)?;

        let mut out = BytesMut::with_capacity(payload.len() + 1);
        out.put_u8(algorithm.tag());
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Serialization("empty compressed payload".into()))?;

        let algorithm = CompressionAlgorithm::from_tag(tag).ok_or_else(|| {
            Error::Serialization(format!("unknown compression tag {:#04x}", tag))
        })?;

        let raw = self.compression.decompress(payload, algorithm)?;
        self.inner.decode(&raw)
    }
}

impl std::fmt::Debug for CompressedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedCodec")
            .field("inner", &self.inner.name())
            .field("config", self.compression.config())
            .finish()
    }
}
