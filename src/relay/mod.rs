//! Relay orchestrators, one per direction
//!
//! Each relay connects its chains before spawning anything, then runs its producer and
//! consumer in the caller's task group.

pub mod beacon;
pub mod parachain;

pub use beacon::{BeaconRelay, BeaconRelayConfig};
pub use parachain::{ParachainRelay, ParachainRelayConfig};
