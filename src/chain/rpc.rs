//! Minimal JSON-RPC 2.0 client over HTTP for Substrate nodes

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use super::ChainConnection;
use crate::error::{submission_error, RelayError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

pub struct JsonRpcClient {
    name: &'static str,
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl JsonRpcClient {
    pub fn new(name: &'static str, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::transport(url.clone(), e))?;
        Ok(Self {
            name,
            url,
            http,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Call `method`; a JSON `null` result decodes as `T`'s null form (use `Option<_>`)
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionClosed(self.name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(chain = self.name, method, id, "RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let response: RpcResponse<Value> = response.json().await?;

        if let Some(err) = response.error {
            let data = err.data.map(|d| format!(" ({})", d)).unwrap_or_default();
            return Err(submission_error(
                &self.url,
                format!("{} failed with {}: {}{}", method, err.code, err.message, data),
            ));
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| RelayError::decode(format!("{} result: {}", method, e)))
    }
}

#[async_trait]
impl ChainConnection for JsonRpcClient {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self) -> Result<()> {
        self.request::<Value>("system_health", json!([])).await?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Header as returned by `chain_getHeader`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateHeader {
    pub parent_hash: alloy::primitives::B256,
    /// Hex-encoded block number
    pub number: String,
    #[serde(default)]
    pub digest: Digest,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Digest {
    #[serde(default)]
    pub logs: Vec<String>,
}

impl SubstrateHeader {
    pub fn block_number(&self) -> Result<u32> {
        u32::from_str_radix(self.number.trim_start_matches("0x"), 16)
            .map_err(|e| RelayError::decode(format!("block number {}: {}", self.number, e)))
    }

    pub fn digest_logs(&self) -> Result<Vec<Vec<u8>>> {
        self.digest.logs.iter().map(|log| from_hex(log)).collect()
    }
}

/// Bytes that nodes serialize either as hex or as a number array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBytes {
    Hex(String),
    Array(Vec<u8>),
}

impl RawBytes {
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Hex(s) => from_hex(&s),
            Self::Array(bytes) => Ok(bytes),
        }
    }
}

/// `0x`-prefixed hex, as Substrate RPC expects
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).map_err(RelayError::decode)
}
