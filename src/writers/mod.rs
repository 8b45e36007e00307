//! Writers submit relayed state to the destination chains

pub mod calls;
pub mod ethereum;
pub mod parachain;

pub use ethereum::{Delivery, EthereumChannelWriter};
pub use parachain::{InclusionPolicy, ParachainWriter};
