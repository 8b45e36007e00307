//! Parachain access: account nonce, extrinsic submission, outbound channel messages

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use codec::Decode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::rpc::{from_hex, to_hex, JsonRpcClient, RawBytes, SubstrateHeader};
use super::scale::{self, CommitmentData};
use super::ChainConnection;
use crate::error::{RelayError, Result};
use crate::types::OutboundBundle;

/// Which block to read account state at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Best,
    Finalized,
}

#[async_trait]
pub trait ParachainApi: ChainConnection {
    async fn account_nonce(&self, account: &[u8; 32], at: BlockRef) -> Result<u32>;

    async fn submit_extrinsic(&self, extrinsic: Bytes) -> Result<B256>;

    async fn block_hash(&self, number: u32) -> Result<Option<B256>>;

    /// Basic channel messages committed in `block`, if any
    async fn outbound_bundle(&self, block: B256) -> Result<Option<OutboundBundle>>;

    async fn merkle_proofs(&self, commitment: B256) -> Result<Vec<Bytes>>;

    /// Highest beacon slot the beacon client pallet holds as finalized, at the finalized block
    async fn latest_finalized_beacon_slot(&self) -> Result<u64>;
}

/// Signs encoded calls for the relayer account; keys stay outside the relayer
#[async_trait]
pub trait ExtrinsicSigner: Send + Sync {
    async fn sign(&self, call: &[u8], nonce: u32) -> Result<Bytes>;
}

pub struct HttpParachainClient {
    rpc: JsonRpcClient,
    indexing_prefix: Vec<u8>,
    beacon_pallet: String,
}

impl HttpParachainClient {
    pub fn new(
        endpoint: impl Into<String>,
        indexing_prefix: impl Into<Vec<u8>>,
        beacon_pallet: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new("parachain", endpoint)?,
            indexing_prefix: indexing_prefix.into(),
            beacon_pallet: beacon_pallet.into(),
        })
    }

    async fn finalized_head(&self) -> Result<B256> {
        self.rpc.request("chain_getFinalizedHead", json!([])).await
    }
}

#[async_trait]
impl ChainConnection for HttpParachainClient {
    fn name(&self) -> &'static str {
        self.rpc.name()
    }

    async fn connect(&self) -> Result<()> {
        self.rpc.connect().await
    }

    fn close(&self) {
        self.rpc.close()
    }
}

#[async_trait]
impl ParachainApi for HttpParachainClient {
    async fn account_nonce(&self, account: &[u8; 32], at: BlockRef) -> Result<u32> {
        let key = to_hex(scale::system_account_key(account));
        let raw: Option<String> = match at {
            BlockRef::Best => self.rpc.request("state_getStorage", json!([key])).await?,
            BlockRef::Finalized => {
                let head = self.finalized_head().await?;
                self.rpc.request("state_getStorage", json!([key, head])).await?
            }
        };
        match raw {
            Some(value) => scale::decode_account_nonce(&from_hex(&value)?),
            // Account never used
            None => Ok(0),
        }
    }

    async fn submit_extrinsic(&self, extrinsic: Bytes) -> Result<B256> {
        self.rpc
            .request("author_submitExtrinsic", json!([to_hex(&extrinsic)]))
            .await
    }

    async fn block_hash(&self, number: u32) -> Result<Option<B256>> {
        self.rpc.request("chain_getBlockHash", json!([number])).await
    }

    async fn outbound_bundle(&self, block: B256) -> Result<Option<OutboundBundle>> {
        let header: Option<SubstrateHeader> =
            self.rpc.request("chain_getHeader", json!([block])).await?;
        let header =
            header.ok_or_else(|| RelayError::decode(format!("unknown parachain block {}", block)))?;

        let Some(commitment_hash) = scale::find_channel_commitment(&header.digest_logs()?) else {
            return Ok(None);
        };

        let key = to_hex(scale::offchain_commitment_key(&self.indexing_prefix, commitment_hash));
        let raw: Option<String> = self
            .rpc
            .request("offchain_localStorageGet", json!(["PERSISTENT", key]))
            .await?;
        let raw = raw.ok_or_else(|| {
            RelayError::decode(format!(
                "commitment {} has no offchain message data; is offchain indexing enabled?",
                commitment_hash
            ))
        })?;

        let data = CommitmentData::decode(&mut from_hex(&raw)?.as_slice())?;
        debug!(%block, %commitment_hash, messages = data.messages.len(), "Read outbound bundle");
        Ok(Some(OutboundBundle {
            commitment_hash,
            messages: data.into_entries(),
        }))
    }

    async fn merkle_proofs(&self, commitment: B256) -> Result<Vec<Bytes>> {
        let proofs: Vec<RawBytes> = self
            .rpc
            .request("get_merkle_proofs", json!([commitment]))
            .await?;
        proofs
            .into_iter()
            .map(|p| p.into_bytes().map(Bytes::from))
            .collect()
    }

    async fn latest_finalized_beacon_slot(&self) -> Result<u64> {
        let key = to_hex(scale::latest_finalized_slot_key(&self.beacon_pallet));
        let head = self.finalized_head().await?;
        let raw: Option<String> = self.rpc.request("state_getStorage", json!([key, head])).await?;
        match raw {
            Some(value) => Ok(u64::decode(&mut from_hex(&value)?.as_slice())?),
            // ValueQuery default
            None => Ok(0),
        }
    }
}

#[derive(Serialize)]
struct SignRequest {
    call: String,
    nonce: u32,
}

#[derive(Deserialize)]
struct SignResponse {
    extrinsic: String,
}

/// Signer sidecar reached over HTTP
pub struct RemoteSigner {
    client: reqwest::Client,
    url: String,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExtrinsicSigner for RemoteSigner {
    async fn sign(&self, call: &[u8], nonce: u32) -> Result<Bytes> {
        let response: SignResponse = self
            .client
            .post(&self.url)
            .json(&SignRequest {
                call: to_hex(call),
                nonce,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Bytes::from(from_hex(&response.extrinsic)?))
    }
}
