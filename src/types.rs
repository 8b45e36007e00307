//! Domain types shared by both relay directions

use alloy::primitives::{Address, Bytes, FixedBytes, B256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// BLS public key (compressed G1 point)
pub type BlsPublicKey = FixedBytes<48>;

/// Fork version as found in beacon fork data
pub type ForkVersion = [u8; 4];

/// Capacity of the listener → channel writer hand-off. One package in flight at most.
pub const MESSAGE_PACKAGE_CHANNEL_CAPACITY: usize = 1;

/// Beacon chain timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSpec {
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
    /// First epoch using the Electra generalized indices, if scheduled
    pub electra_fork_epoch: Option<u64>,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            slots_per_epoch: 32,
            epochs_per_sync_committee_period: 256,
            electra_fork_epoch: None,
        }
    }
}

impl ChainSpec {
    pub fn epoch(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    pub fn sync_period(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch / self.epochs_per_sync_committee_period
    }

    pub fn is_electra(&self, slot: u64) -> bool {
        self.electra_fork_epoch
            .is_some_and(|fork_epoch| self.epoch(slot) >= fork_epoch)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeaconHeader {
    #[serde_as(as = "DisplayFromStr")]
    pub slot: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub proposer_index: u64,
    pub parent_root: B256,
    pub state_root: B256,
    pub body_root: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCommittee {
    pub pubkeys: Vec<BlsPublicKey>,
    pub aggregate_pubkey: BlsPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncAggregate {
    /// SSZ bitvector, least significant bit first
    pub sync_committee_bits: Bytes,
    pub sync_committee_signature: Bytes,
}

impl SyncAggregate {
    /// Number of committee members covered by the bitvector
    pub fn committee_size(&self) -> usize {
        self.sync_committee_bits.len() * 8
    }

    pub fn participants(&self) -> usize {
        self.sync_committee_bits
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// At least one participant and two thirds of the committee signed
    pub fn has_supermajority(&self) -> bool {
        let participants = self.participants();
        participants >= 1 && participants * 3 >= self.committee_size() * 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialSync {
    pub header: BeaconHeader,
    pub current_sync_committee: SyncCommittee,
    pub current_sync_committee_branch: Vec<B256>,
    pub validators_root: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeRotation {
    pub attested_header: BeaconHeader,
    pub next_sync_committee: SyncCommittee,
    pub next_sync_committee_branch: Vec<B256>,
    pub finalized_header: BeaconHeader,
    pub finality_branch: Vec<B256>,
    pub sync_aggregate: SyncAggregate,
    pub fork_version: ForkVersion,
    pub sync_committee_period: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedHeaderUpdate {
    pub attested_header: BeaconHeader,
    pub finalized_header: BeaconHeader,
    pub finality_branch: Vec<B256>,
    pub sync_aggregate: SyncAggregate,
    pub fork_version: ForkVersion,
    pub period: u64,
}

/// Verified light-client state to push to the parachain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPayload {
    Initial(InitialSync),
    CommitteeRotation(CommitteeRotation),
    FinalizedHeader(FinalizedHeaderUpdate),
}

impl SyncPayload {
    /// Sync committee period this payload belongs to
    pub fn period(&self, spec: &ChainSpec) -> u64 {
        match self {
            Self::Initial(p) => spec.sync_period(p.header.slot),
            Self::CommitteeRotation(p) => p.sync_committee_period,
            Self::FinalizedHeader(p) => p.period,
        }
    }

    pub fn header_slot(&self) -> u64 {
        match self {
            Self::Initial(p) => p.header.slot,
            Self::CommitteeRotation(p) => p.finalized_header.slot,
            Self::FinalizedHeader(p) => p.finalized_header.slot,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initial(_) => "initial_sync",
            Self::CommitteeRotation(_) => "committee_rotation",
            Self::FinalizedHeader(_) => "finalized_header",
        }
    }
}

/// A BEEFY signed commitment read from a relay chain justification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityCommitment {
    /// Relay block carrying the justification
    pub block_hash: B256,
    pub payload: Vec<([u8; 2], Vec<u8>)>,
    pub block_number: u32,
    pub validator_set_id: u64,
    /// One entry per validator slot
    pub signatures: Vec<Option<[u8; 65]>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    pub id: u64,
    /// Compressed secp256k1 keys
    pub validators: Vec<[u8; 33]>,
}

/// Committed parachain head resolved from relay chain storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParachainHead {
    pub number: u32,
    pub hash: B256,
    /// SCALE-encoded parachain header
    pub header: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub origin: Address,
    pub payload: Bytes,
}

/// Outbound messages committed in one parachain block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBundle {
    pub commitment_hash: B256,
    pub messages: Vec<MessageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MmrProof {
    pub leaf: Bytes,
    pub proof: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub commitment_hash: B256,
    /// One merkle proof per entry, same order
    pub leaf_proofs: Vec<Bytes>,
    /// Header of the package's own parachain block
    pub parachain_head: Bytes,
    /// Relay block whose `Paras.Heads` entry is `parachain_head`
    pub relay_block_number: u32,
    pub relay_block_hash: B256,
    pub beefy_commitment_hash: B256,
    /// Proof of that relay block's leaf against the commitment's MMR root
    pub mmr: MmrProof,
}

/// Messages of one parachain block, submitted atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePackage {
    pub parachain_block: u32,
    pub parachain_block_hash: B256,
    pub entries: Vec<MessageEntry>,
    pub proof: InclusionProof,
}
