//! Basic inbound channel contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the channel that accepts
//! parachain messages on Ethereum.

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{Bytes, B256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::error::{RelayError, Result};
use crate::types::{self, MessageEntry, MessagePackage, MmrProof};

sol! {
    /// Inbound channel accepting parachain messages proven against a BEEFY commitment
    #[sol(rpc)]
    contract InboundChannel {
        struct Message {
            address origin;
            bytes payload;
        }

        struct InclusionProof {
            bytes32 commitmentHash;
            bytes[] leafProofs;
            bytes parachainHead;
            uint32 parachainBlock;
            uint32 relayBlock;
            bytes32 relayBlockHash;
            bytes32 beefyCommitmentHash;
            bytes mmrLeaf;
            bytes mmrProof;
        }

        /// Verify the proof and dispatch every message in order, atomically
        function submit(Message[] calldata messages, InclusionProof calldata proof) external;

        /// Highest parachain block whose messages were accepted
        function latestParachainBlock() external view returns (uint32 blockNumber);

        /// Emitted once per dispatched message
        event MessageDispatched(address origin, uint64 nonce, bool result);
    }
}

/// Contract arguments for `submit`
pub fn to_abi(package: &MessagePackage) -> (Vec<InboundChannel::Message>, InboundChannel::InclusionProof) {
    let messages = package
        .entries
        .iter()
        .map(|entry| InboundChannel::Message {
            origin: entry.origin,
            payload: entry.payload.clone(),
        })
        .collect();

    let proof = &package.proof;
    let proof = InboundChannel::InclusionProof {
        commitmentHash: proof.commitment_hash,
        leafProofs: proof.leaf_proofs.clone(),
        parachainHead: proof.parachain_head.clone(),
        parachainBlock: package.parachain_block,
        relayBlock: proof.relay_block_number,
        relayBlockHash: proof.relay_block_hash,
        beefyCommitmentHash: proof.beefy_commitment_hash,
        mmrLeaf: proof.mmr.leaf.clone(),
        mmrProof: proof.mmr.proof.clone(),
    };

    (messages, proof)
}

/// ABI-encoded `submit` calldata
pub fn encode_submit(package: &MessagePackage) -> Bytes {
    let (messages, proof) = to_abi(package);
    InboundChannel::submitCall { messages, proof }.abi_encode().into()
}

/// Decode `submit` calldata back into a package. The parachain block hash is not part
/// of the call and comes back zeroed.
pub fn decode_submit(calldata: &[u8]) -> Result<MessagePackage> {
    let call = InboundChannel::submitCall::abi_decode(calldata, true)
        .map_err(|e| RelayError::decode(format!("submit calldata: {}", e)))?;

    let entries = call
        .messages
        .into_iter()
        .map(|m| MessageEntry {
            origin: m.origin,
            payload: m.payload,
        })
        .collect();

    let p = call.proof;
    Ok(MessagePackage {
        parachain_block: p.parachainBlock,
        parachain_block_hash: B256::ZERO,
        entries,
        proof: types::InclusionProof {
            commitment_hash: p.commitmentHash,
            leaf_proofs: p.leafProofs,
            parachain_head: p.parachainHead,
            relay_block_number: p.relayBlock,
            relay_block_hash: p.relayBlockHash,
            beefy_commitment_hash: p.beefyCommitmentHash,
            mmr: MmrProof {
                leaf: p.mmrLeaf,
                proof: p.mmrProof,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn package() -> MessagePackage {
        MessagePackage {
            parachain_block: 1042,
            parachain_block_hash: B256::ZERO,
            entries: vec![
                MessageEntry {
                    origin: Address::repeat_byte(0x0a),
                    payload: Bytes::from_static(b"first"),
                },
                MessageEntry {
                    origin: Address::repeat_byte(0x0b),
                    payload: Bytes::from_static(b"second"),
                },
            ],
            proof: types::InclusionProof {
                commitment_hash: B256::repeat_byte(1),
                leaf_proofs: vec![Bytes::from_static(&[1, 2]), Bytes::from_static(&[3])],
                parachain_head: Bytes::from_static(&[9; 40]),
                relay_block_number: 77,
                relay_block_hash: B256::repeat_byte(2),
                beefy_commitment_hash: B256::repeat_byte(3),
                mmr: MmrProof {
                    leaf: Bytes::from_static(&[4]),
                    proof: Bytes::from_static(&[5, 6]),
                },
            },
        }
    }

    #[test]
    fn test_submit_selector() {
        let calldata = encode_submit(&package());
        assert_eq!(&calldata[..4], InboundChannel::submitCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_submit_calldata_keeps_entry_order() {
        let decoded = decode_submit(&encode_submit(&package())).unwrap();
        assert_eq!(decoded, package());
        assert_eq!(decoded.entries[0].payload, Bytes::from_static(b"first"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_submit(&[0xde, 0xad, 0xbe, 0xef]),
            Err(RelayError::Decode(_))
        ));
    }
}
