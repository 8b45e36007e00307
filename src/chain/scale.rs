//! SCALE wire types and storage key hashing for the relay chain and parachain

use std::hash::Hasher;

use alloy::primitives::{keccak256, Address, Bytes, B256};
use blake2::digest::consts::{U16, U32};
use blake2::{Blake2b, Digest};
use codec::{Compact, Decode, Encode};
use twox_hash::XxHash64;

use crate::error::{RelayError, Result};
use crate::types::{FinalityCommitment, MessageEntry, ParachainHead, ValidatorSet};

/// Consensus engine id of BEEFY justifications
pub const BEEFY_ENGINE_ID: [u8; 4] = *b"BEEF";

/// Payload id of the MMR root in a BEEFY commitment
pub const MMR_ROOT_ID: [u8; 2] = *b"mh";

pub fn twox_64(data: &[u8]) -> [u8; 8] {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish().to_le_bytes()
}

pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (seed, chunk) in out.chunks_mut(8).enumerate() {
        let mut hasher = XxHash64::with_seed(seed as u64);
        hasher.write(data);
        chunk.copy_from_slice(&hasher.finish().to_le_bytes());
    }
    out
}

pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    Blake2b::<U16>::digest(data).into()
}

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    Blake2b::<U32>::digest(data).into()
}

fn storage_prefix(pallet: &str, item: &str) -> Vec<u8> {
    let mut key = twox_128(pallet.as_bytes()).to_vec();
    key.extend_from_slice(&twox_128(item.as_bytes()));
    key
}

/// `Paras.Heads(para_id)`, hashed with Twox64Concat
pub fn paras_heads_key(para_id: u32) -> Vec<u8> {
    let encoded = para_id.encode();
    let mut key = storage_prefix("Paras", "Heads");
    key.extend_from_slice(&twox_64(&encoded));
    key.extend_from_slice(&encoded);
    key
}

/// `System.Account(account)`, hashed with Blake2_128Concat
pub fn system_account_key(account: &[u8; 32]) -> Vec<u8> {
    let mut key = storage_prefix("System", "Account");
    key.extend_from_slice(&blake2_128(account));
    key.extend_from_slice(account);
    key
}

/// `<pallet>.LatestFinalizedHeaderSlot` of the beacon client pallet, a plain value
pub fn latest_finalized_slot_key(pallet: &str) -> Vec<u8> {
    storage_prefix(pallet, "LatestFinalizedHeaderSlot")
}

/// Nonce field of an encoded `AccountInfo`
pub fn decode_account_nonce(mut data: &[u8]) -> Result<u32> {
    Ok(u32::decode(&mut data)?)
}

/// Decode `Paras.Heads` storage, a `HeadData` wrapping the encoded parachain header
pub fn decode_parachain_head(mut data: &[u8]) -> Result<ParachainHead> {
    let header: Vec<u8> = Decode::decode(&mut data)?;
    let mut cursor = header.as_slice();
    let _parent_hash = <[u8; 32]>::decode(&mut cursor)?;
    let number = <Compact<u32>>::decode(&mut cursor)?.0;
    Ok(ParachainHead {
        number,
        hash: B256::from(blake2_256(&header)),
        header: Bytes::from(header),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ChannelId {
    Basic,
    Incentivized,
}

/// Auxiliary digest item emitted by the outbound channels
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum AuxiliaryDigestItem {
    Commitment(ChannelId, [u8; 32]),
}

/// Find the basic channel commitment in a header's digest logs
pub fn find_channel_commitment(logs: &[Vec<u8>]) -> Option<B256> {
    const DIGEST_ITEM_OTHER: u8 = 0;

    logs.iter().find_map(|log| {
        let (kind, mut rest) = log.split_first()?;
        if *kind != DIGEST_ITEM_OTHER {
            return None;
        }
        let inner: Vec<u8> = Decode::decode(&mut rest).ok()?;
        match AuxiliaryDigestItem::decode(&mut inner.as_slice()).ok()? {
            AuxiliaryDigestItem::Commitment(ChannelId::Basic, hash) => Some(B256::from(hash)),
            AuxiliaryDigestItem::Commitment(ChannelId::Incentivized, _) => None,
        }
    })
}

/// Offchain storage key of a channel commitment's message data
pub fn offchain_commitment_key(indexing_prefix: &[u8], commitment: B256) -> Vec<u8> {
    (indexing_prefix, commitment.0).encode()
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OutboundMessage {
    pub origin: [u8; 20],
    pub nonce: u64,
    pub payload: Vec<u8>,
}

/// Message data stored offchain under a channel commitment
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CommitmentData {
    pub messages: Vec<OutboundMessage>,
}

impl CommitmentData {
    /// Entries in emission order
    pub fn into_entries(self) -> Vec<MessageEntry> {
        self.messages
            .into_iter()
            .map(|m| MessageEntry {
                origin: Address::from(m.origin),
                payload: Bytes::from(m.payload),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Commitment {
    pub payload: Vec<([u8; 2], Vec<u8>)>,
    pub block_number: u32,
    pub validator_set_id: u64,
}

impl Commitment {
    /// Message the validators sign
    pub fn hash(&self) -> B256 {
        keccak256(self.encode())
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct CompactSignedCommitment {
    commitment: Commitment,
    signatures_from: Vec<u8>,
    validator_set_len: u32,
    signatures_compact: Vec<[u8; 65]>,
}

#[derive(Debug, Clone, Encode, Decode)]
enum VersionedFinalityProof {
    #[codec(index = 1)]
    V1(CompactSignedCommitment),
}

/// Decode a BEEFY justification found on relay block `block_hash`
pub fn decode_finality_proof(block_hash: B256, mut data: &[u8]) -> Result<FinalityCommitment> {
    let VersionedFinalityProof::V1(compact) = VersionedFinalityProof::decode(&mut data)?;

    let len = compact.validator_set_len as usize;
    if compact.signatures_from.len() * 8 < len {
        return Err(RelayError::decode("signature bitfield shorter than validator set"));
    }

    let mut compact_sigs = compact.signatures_compact.into_iter();
    let mut signatures = Vec::with_capacity(len);
    for i in 0..len {
        let present = compact.signatures_from[i / 8] & (0x80 >> (i % 8)) != 0;
        if present {
            let sig = compact_sigs
                .next()
                .ok_or_else(|| RelayError::decode("fewer signatures than bitfield entries"))?;
            signatures.push(Some(sig));
        } else {
            signatures.push(None);
        }
    }
    if compact_sigs.next().is_some() {
        return Err(RelayError::decode("more signatures than bitfield entries"));
    }

    Ok(FinalityCommitment {
        block_hash,
        payload: compact.commitment.payload,
        block_number: compact.commitment.block_number,
        validator_set_id: compact.commitment.validator_set_id,
        signatures,
    })
}

/// Encode a commitment the way relay chain nodes store it (used by tests and tooling)
pub fn encode_finality_proof(commitment: &FinalityCommitment) -> Vec<u8> {
    let mut signatures_from = vec![0u8; commitment.signatures.len().div_ceil(8)];
    let mut signatures_compact = Vec::new();
    for (i, sig) in commitment.signatures.iter().enumerate() {
        if let Some(sig) = sig {
            signatures_from[i / 8] |= 0x80 >> (i % 8);
            signatures_compact.push(*sig);
        }
    }
    VersionedFinalityProof::V1(CompactSignedCommitment {
        commitment: commitment_of(commitment),
        signatures_from,
        validator_set_len: commitment.signatures.len() as u32,
        signatures_compact,
    })
    .encode()
}

pub fn commitment_of(commitment: &FinalityCommitment) -> Commitment {
    Commitment {
        payload: commitment.payload.clone(),
        block_number: commitment.block_number,
        validator_set_id: commitment.validator_set_id,
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct ValidatorSetWire {
    validators: Vec<[u8; 33]>,
    id: u64,
}

/// Decode the `BeefyApi_validator_set` runtime call result
pub fn decode_validator_set(mut data: &[u8]) -> Result<Option<ValidatorSet>> {
    let set: Option<ValidatorSetWire> = Decode::decode(&mut data)?;
    Ok(set.map(|s| ValidatorSet {
        id: s.id,
        validators: s.validators,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_storage_prefix() {
        // System.Account prefix as seen on every Substrate chain
        assert_eq!(
            hex::encode(storage_prefix("System", "Account")),
            "26aa394eea5630e07c48ae0c9558cef7b99d880ec681799c0cf30e8886371da9"
        );
    }

    #[test]
    fn test_latest_finalized_slot_key() {
        let key = latest_finalized_slot_key("EthereumBeaconClient");
        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], &twox_128(b"EthereumBeaconClient"));
        assert_eq!(&key[16..], &twox_128(b"LatestFinalizedHeaderSlot"));
    }

    #[test]
    fn test_paras_heads_key_layout() {
        let key = paras_heads_key(1000);
        assert_eq!(key.len(), 32 + 8 + 4);
        assert_eq!(&key[40..], &1000u32.to_le_bytes());
    }

    #[test]
    fn test_parachain_head_decoding() {
        let mut header = vec![7u8; 32];
        header.extend(Compact(4242u32).encode());
        header.extend([0u8; 64]);
        let storage = header.encode();

        let head = decode_parachain_head(&storage).unwrap();
        assert_eq!(head.number, 4242);
        assert_eq!(head.hash, B256::from(blake2_256(&header)));
        assert_eq!(head.header.as_ref(), header.as_slice());
    }

    #[test]
    fn test_find_channel_commitment() {
        let hash = [9u8; 32];
        let basic = AuxiliaryDigestItem::Commitment(ChannelId::Basic, hash).encode();
        let incentivized = AuxiliaryDigestItem::Commitment(ChannelId::Incentivized, [1u8; 32]).encode();

        let wrap = |inner: Vec<u8>| {
            let mut log = vec![0u8];
            log.extend(inner.encode());
            log
        };
        let pre_runtime = vec![6u8, 1, 2, 3];

        let logs = vec![pre_runtime, wrap(incentivized), wrap(basic)];
        assert_eq!(find_channel_commitment(&logs), Some(B256::from(hash)));
        assert_eq!(find_channel_commitment(&logs[..2]), None);
    }

    #[test]
    fn test_finality_proof_bitfield_is_msb_first() {
        let commitment = FinalityCommitment {
            block_hash: B256::ZERO,
            payload: vec![(MMR_ROOT_ID, vec![1; 32])],
            block_number: 100,
            validator_set_id: 3,
            signatures: vec![Some([1u8; 65]), None, None, Some([4u8; 65]), None, None, None, None, Some([9u8; 65])],
        };
        let encoded = encode_finality_proof(&commitment);

        let VersionedFinalityProof::V1(compact) =
            VersionedFinalityProof::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(compact.signatures_from, vec![0b1001_0000, 0b1000_0000]);
        assert_eq!(compact.validator_set_len, 9);

        let decoded = decode_finality_proof(B256::ZERO, &encoded).unwrap();
        assert_eq!(decoded, commitment);
    }

    #[test]
    fn test_finality_proof_rejects_inconsistent_bitfield() {
        let proof = VersionedFinalityProof::V1(CompactSignedCommitment {
            commitment: Commitment {
                payload: vec![],
                block_number: 1,
                validator_set_id: 0,
            },
            signatures_from: vec![0b1100_0000],
            validator_set_len: 2,
            signatures_compact: vec![[0u8; 65]],
        })
        .encode();
        assert!(decode_finality_proof(B256::ZERO, &proof).is_err());
    }

    #[test]
    fn test_offchain_key() {
        let key = offchain_commitment_key(b"commitment", B256::repeat_byte(1));
        assert_eq!(key[0], 10 << 2);
        assert_eq!(&key[1..11], b"commitment");
        assert_eq!(&key[11..], &[1u8; 32]);
    }
}
