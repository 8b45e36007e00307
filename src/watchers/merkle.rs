//! SSZ merkleization and branch verification for light client proofs

use alloy::primitives::B256;
use sha2::{Digest, Sha256};

use crate::types::{BeaconHeader, BlsPublicKey, ChainSpec, SyncCommittee};

pub const FINALIZED_ROOT_GINDEX: u64 = 105;
pub const CURRENT_SYNC_COMMITTEE_GINDEX: u64 = 54;
pub const NEXT_SYNC_COMMITTEE_GINDEX: u64 = 55;

pub const FINALIZED_ROOT_GINDEX_ELECTRA: u64 = 169;
pub const CURRENT_SYNC_COMMITTEE_GINDEX_ELECTRA: u64 = 86;
pub const NEXT_SYNC_COMMITTEE_GINDEX_ELECTRA: u64 = 87;

/// Depth of a generalized index in its tree
pub const fn floorlog2(gindex: u64) -> usize {
    (u64::BITS - gindex.leading_zeros() - 1) as usize
}

/// Position of a generalized index among the leaves at its depth
pub const fn subtree_index(gindex: u64) -> u64 {
    gindex % (1 << floorlog2(gindex))
}

/// Generalized indices for the beacon state fields tracked by the light client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateGindices {
    pub finalized_root: u64,
    pub current_sync_committee: u64,
    pub next_sync_committee: u64,
}

impl StateGindices {
    pub const ALTAIR: Self = Self {
        finalized_root: FINALIZED_ROOT_GINDEX,
        current_sync_committee: CURRENT_SYNC_COMMITTEE_GINDEX,
        next_sync_committee: NEXT_SYNC_COMMITTEE_GINDEX,
    };

    pub const ELECTRA: Self = Self {
        finalized_root: FINALIZED_ROOT_GINDEX_ELECTRA,
        current_sync_committee: CURRENT_SYNC_COMMITTEE_GINDEX_ELECTRA,
        next_sync_committee: NEXT_SYNC_COMMITTEE_GINDEX_ELECTRA,
    };

    pub fn for_slot(spec: &ChainSpec, slot: u64) -> Self {
        if spec.is_electra(slot) {
            Self::ELECTRA
        } else {
            Self::ALTAIR
        }
    }
}

pub fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from_slice(&hasher.finalize())
}

/// Merkleize chunks, padding with zero subtrees up to the next power of two
pub fn merkleize(chunks: &[B256]) -> B256 {
    if chunks.is_empty() {
        return B256::ZERO;
    }
    let width = chunks.len().next_power_of_two();
    let mut layer: Vec<B256> = chunks.to_vec();
    layer.resize(width, B256::ZERO);

    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

fn uint64_chunk(value: u64) -> B256 {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&value.to_le_bytes());
    B256::from(chunk)
}

pub fn hash_tree_root_header(header: &BeaconHeader) -> B256 {
    merkleize(&[
        uint64_chunk(header.slot),
        uint64_chunk(header.proposer_index),
        header.parent_root,
        header.state_root,
        header.body_root,
    ])
}

fn hash_tree_root_pubkey(pubkey: &BlsPublicKey) -> B256 {
    let mut high = [0u8; 32];
    high[..16].copy_from_slice(&pubkey[32..]);
    hash_pair(&B256::from_slice(&pubkey[..32]), &B256::from(high))
}

pub fn hash_tree_root_sync_committee(committee: &SyncCommittee) -> B256 {
    let pubkey_roots: Vec<B256> = committee.pubkeys.iter().map(hash_tree_root_pubkey).collect();
    hash_pair(
        &merkleize(&pubkey_roots),
        &hash_tree_root_pubkey(&committee.aggregate_pubkey),
    )
}

/// Root obtained by hashing `leaf` up through `branch` at `gindex`
pub fn branch_root(leaf: B256, branch: &[B256], gindex: u64) -> B256 {
    let index = subtree_index(gindex);
    branch
        .iter()
        .enumerate()
        .fold(leaf, |value, (i, sibling)| {
            if (index >> i) & 1 == 0 {
                hash_pair(&value, sibling)
            } else {
                hash_pair(sibling, &value)
            }
        })
}

/// Check that `leaf` sits at `gindex` under `root`
pub fn is_valid_merkle_branch(leaf: B256, branch: &[B256], gindex: u64, root: B256) -> bool {
    branch.len() == floorlog2(gindex) && branch_root(leaf, branch, gindex) == root
}
