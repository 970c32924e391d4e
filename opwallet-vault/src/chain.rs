//! On-chain public key linkage
//!
//! A node can report which ML-DSA public key hash has been linked on chain
//! to a classical public key. Duplication detection uses this to tell which
//! of several local quantum keys is the one the chain knows about.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for linkage queries
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PUBLIC_KEY_INFO_METHOD: &str = "btc_publicKeyInfo";

/// JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("missing result in RPC response")]
    MissingResult,
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Http(err.to_string())
    }
}

/// Read-only chain queries used by the vault
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// ML-DSA public key hash (hex) linked on chain to `public_key`, if any.
    async fn get_public_key_linkage(&self, public_key: &str) -> Result<Option<String>, ChainError>;
}

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Value,
    id: u64,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyInfo {
    #[serde(default)]
    mldsa_hashed_public_key: Option<String>,
}

/// Chain query over a node's JSON-RPC endpoint
#[derive(Debug, Clone)]
pub struct JsonRpcChainQuery {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcChainQuery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, params: Value) -> Result<HashMap<String, PublicKeyInfo>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: PUBLIC_KEY_INFO_METHOD,
            params,
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Http(response.status().to_string()));
        }

        let response: JsonRpcResponse<HashMap<String, PublicKeyInfo>> = response.json().await?;
        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(ChainError::MissingResult)
    }
}

#[async_trait]
impl ChainQuery for JsonRpcChainQuery {
    async fn get_public_key_linkage(&self, public_key: &str) -> Result<Option<String>, ChainError> {
        let mut result = self.call(json!([[public_key]])).await?;
        let linked = result
            .remove(public_key)
            .and_then(|info| info.mldsa_hashed_public_key)
            .filter(|hash| !hash.is_empty())
            .map(|hash| hash.trim_start_matches("0x").to_ascii_lowercase());

        debug!(
            "Linkage for {}: {}",
            public_key,
            linked.as_deref().unwrap_or("none")
        );
        Ok(linked)
    }
}
