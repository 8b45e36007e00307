//! Ethereum contract bindings

pub mod inbound_channel;
