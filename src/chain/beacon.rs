//! Beacon node light client API
//!
//! Checkpoint queries (bootstrap, updates, genesis, fork) go to the beacon endpoint;
//! finality updates go to a separate endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::{FixedBytes, B256};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::debug;

use super::ChainConnection;
use crate::error::{RelayError, Result};
use crate::types::{BeaconHeader, ForkVersion, SyncAggregate, SyncCommittee};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientHeader {
    pub beacon: BeaconHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientBootstrap {
    pub header: LightClientHeader,
    pub current_sync_committee: SyncCommittee,
    pub current_sync_committee_branch: Vec<B256>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientUpdate {
    pub attested_header: LightClientHeader,
    pub next_sync_committee: SyncCommittee,
    pub next_sync_committee_branch: Vec<B256>,
    pub finalized_header: LightClientHeader,
    pub finality_branch: Vec<B256>,
    pub sync_aggregate: SyncAggregate,
    #[serde_as(as = "DisplayFromStr")]
    pub signature_slot: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientFinalityUpdate {
    pub attested_header: LightClientHeader,
    pub finalized_header: LightClientHeader,
    pub finality_branch: Vec<B256>,
    pub sync_aggregate: SyncAggregate,
    #[serde_as(as = "DisplayFromStr")]
    pub signature_slot: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response<Data> {
    #[serde(default)]
    pub version: Option<String>,
    pub data: Data,
}

#[derive(Debug, Deserialize)]
struct Genesis {
    genesis_validators_root: B256,
}

#[derive(Debug, Deserialize)]
struct Fork {
    current_version: FixedBytes<4>,
}

#[async_trait]
pub trait BeaconApi: ChainConnection {
    async fn bootstrap(&self, block_root: B256) -> Result<LightClientBootstrap>;

    async fn updates(&self, start_period: u64, count: u64) -> Result<Vec<LightClientUpdate>>;

    async fn finality_update(&self) -> Result<LightClientFinalityUpdate>;

    async fn genesis_validators_root(&self) -> Result<B256>;

    async fn fork_version(&self, slot: u64) -> Result<ForkVersion>;
}

pub struct HttpBeaconClient {
    client: Client,
    base_url: String,
    finalized_update_url: String,
    closed: AtomicBool,
}

impl HttpBeaconClient {
    pub fn new(base_url: impl Into<String>, finalized_update_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::transport(base_url.clone(), e))?;
        Ok(Self {
            client,
            finalized_update_url: finalized_update_url.into().trim_end_matches('/').to_string(),
            base_url,
            closed: AtomicBool::new(false),
        })
    }

    /// `Ok(None)` on 404
    async fn get_json<T: DeserializeOwned>(&self, base: &str, path: &str) -> Result<Option<T>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionClosed("beacon"));
        }
        let url = format!("{}{}", base, path);
        debug!(%url, "get_json");

        let res = self.client.get(&url).send().await?;
        match res.status() {
            StatusCode::OK => {
                let bytes = res.bytes().await?;
                serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|e| RelayError::decode(format!("{}: {}", url, e)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            code => Err(RelayError::transport(
                url,
                format!("status {}: {}", code, res.text().await.unwrap_or_default()),
            )),
        }
    }

    async fn get_required<T: DeserializeOwned>(&self, base: &str, path: &str) -> Result<T> {
        self.get_json(base, path)
            .await?
            .ok_or_else(|| RelayError::transport(format!("{}{}", base, path), "not found"))
    }
}

#[async_trait]
impl ChainConnection for HttpBeaconClient {
    fn name(&self) -> &'static str {
        "beacon"
    }

    async fn connect(&self) -> Result<()> {
        self.genesis_validators_root().await?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BeaconApi for HttpBeaconClient {
    async fn bootstrap(&self, block_root: B256) -> Result<LightClientBootstrap> {
        let path = format!("/eth/v1/beacon/light_client/bootstrap/{}", block_root);
        let response: Option<Response<LightClientBootstrap>> =
            self.get_json(&self.base_url, &path).await?;
        response
            .map(|r| r.data)
            .ok_or(RelayError::UntrustedCheckpoint(block_root))
    }

    async fn updates(&self, start_period: u64, count: u64) -> Result<Vec<LightClientUpdate>> {
        let path = format!(
            "/eth/v1/beacon/light_client/updates?start_period={start_period}&count={count}"
        );
        let updates: Vec<Response<LightClientUpdate>> =
            self.get_required(&self.base_url, &path).await?;
        Ok(updates.into_iter().map(|r| r.data).collect())
    }

    async fn finality_update(&self) -> Result<LightClientFinalityUpdate> {
        let response: Response<LightClientFinalityUpdate> = self
            .get_required(
                &self.finalized_update_url,
                "/eth/v1/beacon/light_client/finality_update",
            )
            .await?;
        Ok(response.data)
    }

    async fn genesis_validators_root(&self) -> Result<B256> {
        let response: Response<Genesis> = self
            .get_required(&self.base_url, "/eth/v1/beacon/genesis")
            .await?;
        Ok(response.data.genesis_validators_root)
    }

    async fn fork_version(&self, slot: u64) -> Result<ForkVersion> {
        let path = format!("/eth/v1/beacon/states/{}/fork", slot);
        let response: Response<Fork> = self.get_required(&self.base_url, &path).await?;
        Ok(response.data.current_version.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finality_update_json() {
        let json = r#"{
            "version": "deneb",
            "data": {
                "attested_header": {
                    "beacon": {
                        "slot": "8300", "proposer_index": "1",
                        "parent_root": "0x0000000000000000000000000000000000000000000000000000000000000000",
                        "state_root": "0x1111111111111111111111111111111111111111111111111111111111111111",
                        "body_root": "0x0000000000000000000000000000000000000000000000000000000000000000"
                    },
                    "execution": {},
                    "execution_branch": []
                },
                "finalized_header": {
                    "beacon": {
                        "slot": "8224", "proposer_index": "2",
                        "parent_root": "0x0000000000000000000000000000000000000000000000000000000000000000",
                        "state_root": "0x0000000000000000000000000000000000000000000000000000000000000000",
                        "body_root": "0x0000000000000000000000000000000000000000000000000000000000000000"
                    }
                },
                "finality_branch": ["0x2222222222222222222222222222222222222222222222222222222222222222"],
                "sync_aggregate": {
                    "sync_committee_bits": "0xff01",
                    "sync_committee_signature": "0xabcd"
                },
                "signature_slot": "8301"
            }
        }"#;
        let response: Response<LightClientFinalityUpdate> = serde_json::from_str(json).unwrap();
        assert_eq!(response.version.as_deref(), Some("deneb"));
        let update = response.data;
        assert_eq!(update.attested_header.beacon.slot, 8300);
        assert_eq!(update.finalized_header.beacon.slot, 8224);
        assert_eq!(update.finality_branch, vec![B256::repeat_byte(0x22)]);
        assert_eq!(update.sync_aggregate.participants(), 9);
        assert_eq!(update.signature_slot, 8301);
    }

    #[test]
    fn test_fork_json() {
        let json = r#"{"data":{"previous_version":"0x04000000","current_version":"0x05000000","epoch":"364032"}}"#;
        let response: Response<Fork> = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.current_version.0, [5, 0, 0, 0]);
    }
}
