//! Connector boundary
//!
//! External data connectors (Census, BLS, BEA, EPA, OSM, ...) implement
//! [`Connector`]; the warmer calls [`Connector::fetch`] and stores whatever
//! structured payload comes back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by an upstream connector
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Transport or HTTP failure
    #[error("request failed: {0}")]
    Request(String),

    /// Upstream answered with something that could not be parsed
    #[error("unexpected payload: {0}")]
    Payload(String),

    /// Upstream has no data for the market
    #[error("no data for market '{0}'")]
    NotFound(String),

    /// Upstream refused with its own throttling response
    #[error("throttled by upstream")]
    Throttled,
}

/// An external data source
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source name used for cache keys, TTL policy and rate limiting
    fn source(&self) -> &str;

    /// Fetch the payload for one market
    async fn fetch(&self, market: &str) -> Result<Value, ConnectorError>;
}

/// Connectors keyed by lowercased source name
pub type ConnectorMap = HashMap<String, Arc<dyn Connector>>;

/// Index connectors by their source name
pub fn connector_map(connectors: impl IntoIterator<Item = Arc<dyn Connector>>) -> ConnectorMap {
    connectors
        .into_iter()
        .map(|c| (c.source().trim().to_lowercase(), c))
        .collect()
}
