//! SCALE encoding of beacon client pallet calls

use codec::Encode;

use crate::types::{BeaconHeader, SyncAggregate, SyncCommittee, SyncPayload};

pub const INITIAL_SYNC_CALL_INDEX: u8 = 0;
pub const SYNC_COMMITTEE_PERIOD_UPDATE_CALL_INDEX: u8 = 1;
pub const IMPORT_FINALIZED_HEADER_CALL_INDEX: u8 = 2;

#[derive(Encode)]
struct BeaconHeaderWire {
    slot: u64,
    proposer_index: u64,
    parent_root: [u8; 32],
    state_root: [u8; 32],
    body_root: [u8; 32],
}

impl From<&BeaconHeader> for BeaconHeaderWire {
    fn from(h: &BeaconHeader) -> Self {
        Self {
            slot: h.slot,
            proposer_index: h.proposer_index,
            parent_root: h.parent_root.0,
            state_root: h.state_root.0,
            body_root: h.body_root.0,
        }
    }
}

#[derive(Encode)]
struct SyncCommitteeWire {
    pubkeys: Vec<[u8; 48]>,
    aggregate_pubkey: [u8; 48],
}

impl From<&SyncCommittee> for SyncCommitteeWire {
    fn from(c: &SyncCommittee) -> Self {
        Self {
            pubkeys: c.pubkeys.iter().map(|k| k.0).collect(),
            aggregate_pubkey: c.aggregate_pubkey.0,
        }
    }
}

#[derive(Encode)]
struct SyncAggregateWire {
    /// SSZ bitvector as served by the beacon node; the pallet expands it
    sync_committee_bits: Vec<u8>,
    sync_committee_signature: Vec<u8>,
}

impl From<&SyncAggregate> for SyncAggregateWire {
    fn from(a: &SyncAggregate) -> Self {
        Self {
            sync_committee_bits: a.sync_committee_bits.to_vec(),
            sync_committee_signature: a.sync_committee_signature.to_vec(),
        }
    }
}

#[derive(Encode)]
struct InitialSyncWire {
    header: BeaconHeaderWire,
    current_sync_committee: SyncCommitteeWire,
    current_sync_committee_branch: Vec<[u8; 32]>,
    validators_root: [u8; 32],
}

#[derive(Encode)]
struct SyncCommitteePeriodUpdateWire {
    attested_header: BeaconHeaderWire,
    next_sync_committee: SyncCommitteeWire,
    next_sync_committee_branch: Vec<[u8; 32]>,
    finalized_header: BeaconHeaderWire,
    finality_branch: Vec<[u8; 32]>,
    sync_aggregate: SyncAggregateWire,
    fork_version: [u8; 4],
    sync_committee_period: u64,
}

#[derive(Encode)]
struct FinalizedHeaderUpdateWire {
    attested_header: BeaconHeaderWire,
    finalized_header: BeaconHeaderWire,
    finality_branch: Vec<[u8; 32]>,
    sync_aggregate: SyncAggregateWire,
    fork_version: [u8; 4],
}

fn branch(nodes: &[alloy::primitives::B256]) -> Vec<[u8; 32]> {
    nodes.iter().map(|n| n.0).collect()
}

pub fn call_index(payload: &SyncPayload) -> u8 {
    match payload {
        SyncPayload::Initial(_) => INITIAL_SYNC_CALL_INDEX,
        SyncPayload::CommitteeRotation(_) => SYNC_COMMITTEE_PERIOD_UPDATE_CALL_INDEX,
        SyncPayload::FinalizedHeader(_) => IMPORT_FINALIZED_HEADER_CALL_INDEX,
    }
}

/// `[pallet_index, call_index] ++ SCALE(args)`
pub fn encode_call(pallet_index: u8, payload: &SyncPayload) -> Vec<u8> {
    let mut call = vec![pallet_index, call_index(payload)];
    match payload {
        SyncPayload::Initial(p) => InitialSyncWire {
            header: (&p.header).into(),
            current_sync_committee: (&p.current_sync_committee).into(),
            current_sync_committee_branch: branch(&p.current_sync_committee_branch),
            validators_root: p.validators_root.0,
        }
        .encode_to(&mut call),
        SyncPayload::CommitteeRotation(p) => SyncCommitteePeriodUpdateWire {
            attested_header: (&p.attested_header).into(),
            next_sync_committee: (&p.next_sync_committee).into(),
            next_sync_committee_branch: branch(&p.next_sync_committee_branch),
            finalized_header: (&p.finalized_header).into(),
            finality_branch: branch(&p.finality_branch),
            sync_aggregate: (&p.sync_aggregate).into(),
            fork_version: p.fork_version,
            sync_committee_period: p.sync_committee_period,
        }
        .encode_to(&mut call),
        SyncPayload::FinalizedHeader(p) => FinalizedHeaderUpdateWire {
            attested_header: (&p.attested_header).into(),
            finalized_header: (&p.finalized_header).into(),
            finality_branch: branch(&p.finality_branch),
            sync_aggregate: (&p.sync_aggregate).into(),
            fork_version: p.fork_version,
        }
        .encode_to(&mut call),
    }
    call
}
