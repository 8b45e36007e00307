//! Watchers follow a source chain and produce verified relay items

pub mod beacon;
pub mod beefy;
pub mod merkle;

pub use beacon::{BeaconSyncer, CommitteeUpdates, FinalizedUpdates, SyncState};
pub use beefy::{signature_threshold, verify_commitment, CommitmentListener};
