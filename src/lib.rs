//! Bidirectional relayer between an Ethereum beacon chain and a parachain
//!
//! - Beacon direction: verified light-client updates are written to the parachain's beacon pallet.
//! - Parachain direction: BEEFY-finalized outbound messages are delivered to the Ethereum
//!   inbound channel contract.

pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod retry;
pub mod task_group;
pub mod types;
pub mod watchers;
pub mod writers;
