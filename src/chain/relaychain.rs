//! Relay chain access: BEEFY justifications, validator sets, parachain heads, MMR proofs

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::rpc::{from_hex, to_hex, JsonRpcClient, RawBytes, SubstrateHeader};
use super::scale::{self, BEEFY_ENGINE_ID};
use super::ChainConnection;
use crate::error::{RelayError, Result};
use crate::types::{FinalityCommitment, MmrProof, ParachainHead, ValidatorSet};

#[async_trait]
pub trait RelayChainApi: ChainConnection {
    /// Latest relay block finalized by BEEFY
    async fn finalized_beefy_head(&self) -> Result<B256>;

    /// BEEFY commitment carried by `block`, if it has a justification
    async fn finality_commitment(&self, block: B256) -> Result<Option<FinalityCommitment>>;

    async fn parent_hash(&self, block: B256) -> Result<B256>;

    async fn validator_set(&self, at: B256) -> Result<Option<ValidatorSet>>;

    /// `Paras.Heads(para_id)` at relay block `at`
    async fn parachain_head(&self, para_id: u32, at: B256) -> Result<Option<ParachainHead>>;

    async fn mmr_proof(&self, block_number: u32, at: B256) -> Result<MmrProof>;
}

#[derive(Deserialize)]
struct SignedBlock {
    #[serde(default)]
    justifications: Option<Vec<(RawBytes, RawBytes)>>,
}

#[derive(Deserialize)]
struct LeavesProof {
    leaves: String,
    proof: String,
}

pub struct HttpRelayChainClient {
    rpc: JsonRpcClient,
}

impl HttpRelayChainClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new("relaychain", endpoint)?,
        })
    }
}

#[async_trait]
impl ChainConnection for HttpRelayChainClient {
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
impl RelayChainApi for HttpRelayChainClient {
    async fn finalized_beefy_head(&self) -> Result<B256> {
        self.rpc.request("beefy_getFinalizedHead", json!([])).await
    }

    async fn finality_commitment(&self, block: B256) -> Result<Option<FinalityCommitment>> {
        let signed: Option<SignedBlock> = self.rpc.request("chain_getBlock", json!([block])).await?;
        let Some(justifications) = signed.and_then(|b| b.justifications) else {
            return Ok(None);
        };

        for (engine_id, data) in justifications {
            if engine_id.into_bytes()? == BEEFY_ENGINE_ID {
                let data = data.into_bytes()?;
                return scale::decode_finality_proof(block, &data).map(Some);
            }
        }
        Ok(None)
    }

    async fn parent_hash(&self, block: B256) -> Result<B256> {
        let header: Option<SubstrateHeader> =
            self.rpc.request("chain_getHeader", json!([block])).await?;
        header
            .map(|h| h.parent_hash)
            .ok_or_else(|| RelayError::decode(format!("unknown relay block {}", block)))
    }

    async fn validator_set(&self, at: B256) -> Result<Option<ValidatorSet>> {
        let raw: String = self
            .rpc
            .request("state_call", json!(["BeefyApi_validator_set", "0x", at]))
            .await?;
        scale::decode_validator_set(&from_hex(&raw)?)
    }

    async fn parachain_head(&self, para_id: u32, at: B256) -> Result<Option<ParachainHead>> {
        let key = to_hex(scale::paras_heads_key(para_id));
        let raw: Option<String> = self.rpc.request("state_getStorage", json!([key, at])).await?;
        raw.map(|value| scale::decode_parachain_head(&from_hex(&value)?))
            .transpose()
    }

    async fn mmr_proof(&self, block_number: u32, at: B256) -> Result<MmrProof> {
        let proof: LeavesProof = self
            .rpc
            .request("mmr_generateProof", json!([[block_number], null, at]))
            .await?;
        Ok(MmrProof {
            leaf: Bytes::from(from_hex(&proof.leaves)?),
            proof: Bytes::from(from_hex(&proof.proof)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_block_with_number_array_justification() {
        let signed: SignedBlock = serde_json::from_value(json!({
            "block": { "header": {}, "extrinsics": [] },
            "justifications": [[[66, 69, 69, 70], [1, 2, 3]], [[70, 82, 78, 75], "0x00"]]
        }))
        .unwrap();
        let justifications = signed.justifications.unwrap();
        assert_eq!(justifications.len(), 2);
        let (engine, data) = justifications[0].clone();
        assert_eq!(engine.into_bytes().unwrap(), BEEFY_ENGINE_ID.to_vec());
        assert_eq!(data.into_bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_signed_block_without_justification() {
        let signed: SignedBlock = serde_json::from_value(json!({
            "block": { "header": {}, "extrinsics": [] },
            "justifications": null
        }))
        .unwrap();
        assert!(signed.justifications.is_none());
    }
}
