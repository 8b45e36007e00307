//! Parachain to Ethereum relay: commitment listener feeding the channel writer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::chain::{
    connect_with_retry, InboundChannelApi, ParachainApi, RelayChainApi,
};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::task_group::TaskGroup;
use crate::types::MESSAGE_PACKAGE_CHANNEL_CAPACITY;
use crate::watchers::CommitmentListener;
use crate::writers::EthereumChannelWriter;

#[derive(Debug, Clone)]
pub struct ParachainRelayConfig {
    pub para_id: u32,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

pub struct ParachainRelay {
    relay: Arc<dyn RelayChainApi>,
    parachain: Arc<dyn ParachainApi>,
    channel: Arc<dyn InboundChannelApi>,
    config: ParachainRelayConfig,
    stopped: AtomicBool,
}

impl ParachainRelay {
    pub fn new(
        relay: Arc<dyn RelayChainApi>,
        parachain: Arc<dyn ParachainApi>,
        channel: Arc<dyn InboundChannelApi>,
        config: ParachainRelayConfig,
    ) -> Self {
        Self {
            relay,
            parachain,
            channel,
            config,
            stopped: AtomicBool::new(false),
        }
    }

    /// Connect all three chains, then spawn the listener and the writer
    pub async fn start(&self, group: &mut TaskGroup) -> Result<()> {
        let cancel = group.token();
        let retry = &self.config.retry;

        if !connect_with_retry(self.relay.as_ref(), retry, &cancel).await? {
            return Ok(());
        }
        if !connect_with_retry(self.parachain.as_ref(), retry, &cancel).await? {
            return Ok(());
        }
        if !connect_with_retry(self.channel.as_ref(), retry, &cancel).await? {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(MESSAGE_PACKAGE_CHANNEL_CAPACITY);

        CommitmentListener::new(
            self.relay.clone(),
            self.parachain.clone(),
            self.channel.clone(),
            self.config.para_id,
            self.config.poll_interval,
            retry.clone(),
            tx,
        )
        .start(group);
        EthereumChannelWriter::new(self.channel.clone(), rx, retry.clone()).start(group);

        info!(para_id = self.config.para_id, "Parachain relay started");
        Ok(())
    }

    /// Close the relay chain, parachain and Ethereum connections. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.relay.close();
        self.parachain.close();
        self.channel.close();
        info!("Parachain relay stopped");
    }
}
