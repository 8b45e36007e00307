//! Ethereum channel writer
//!
//! Consumes message packages from the hand-off channel and delivers each one to the
//! inbound channel contract in a single transaction.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::InboundChannelApi;
use crate::error::Result;
use crate::retry::{sleep_or_cancel, RetryAction, RetryPolicy};
use crate::task_group::TaskGroup;
use crate::types::MessagePackage;

/// Outcome of handling one package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    AlreadyDelivered,
    Cancelled,
}

pub struct EthereumChannelWriter {
    api: Arc<dyn InboundChannelApi>,
    receiver: mpsc::Receiver<MessagePackage>,
    retry: RetryPolicy,
    nonce: Option<u64>,
}

impl EthereumChannelWriter {
    pub fn new(
        api: Arc<dyn InboundChannelApi>,
        receiver: mpsc::Receiver<MessagePackage>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            receiver,
            retry,
            nonce: None,
        }
    }

    pub fn start(self, group: &mut TaskGroup) {
        let cancel = group.token();
        group.spawn("ethereum_channel_writer", self.run(cancel));
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Ethereum channel writer started");
        loop {
            let package = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                package = self.receiver.recv() => match package {
                    Some(package) => package,
                    // Producer gone
                    None => return Ok(()),
                },
            };

            if self.deliver(&package, &cancel).await? == Delivery::Cancelled {
                return Ok(());
            }
        }
    }

    /// Submit `package` until it lands, retrying transport failures in place.
    ///
    /// A failed attempt keeps its nonce unless the node reports that nonce as spent or
    /// ahead. A timed-out transaction can therefore only be replaced, never duplicated.
    pub async fn deliver(
        &mut self,
        package: &MessagePackage,
        cancel: &CancellationToken,
    ) -> Result<Delivery> {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(Delivery::Cancelled);
            }
            match self.try_deliver(package).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) => {
                    failures += 1;
                    match self.retry.decide(failures, &e) {
                        RetryAction::RetryAfter(backoff) => {
                            if e.is_nonce_mismatch() {
                                self.nonce = None;
                            } else if e.is_already_pending() {
                                debug!(
                                    parachain_block = package.parachain_block,
                                    nonce = ?self.nonce,
                                    "Earlier submission still pending"
                                );
                            }
                            warn!(
                                parachain_block = package.parachain_block,
                                attempt = failures,
                                max = self.retry.max_attempts,
                                ?backoff,
                                error = %e,
                                "Package submission failed, retrying"
                            );
                            crate::metrics::record_retry("ethereum_submit");
                            if !sleep_or_cancel(backoff, cancel).await {
                                return Ok(Delivery::Cancelled);
                            }
                        }
                        RetryAction::GiveUp => {
                            self.nonce = None;
                            return Err(self.retry.exhausted("ethereum_submit", failures, e));
                        }
                    }
                }
            }
        }
    }

    async fn try_deliver(&mut self, package: &MessagePackage) -> Result<Delivery> {
        let latest = self.api.latest_parachain_block().await?;
        if latest >= package.parachain_block {
            info!(
                parachain_block = package.parachain_block,
                latest,
                "Package already delivered, skipping"
            );
            crate::metrics::record_package("already_delivered");
            // An earlier attempt may have landed with the nonce held here
            self.nonce = None;
            return Ok(Delivery::AlreadyDelivered);
        }

        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = self.api.pending_nonce().await?;
                debug!(nonce, "Refreshed Ethereum nonce");
                nonce
            }
        };
        self.nonce = Some(nonce);

        let tx_hash = self.api.submit(package, nonce).await?;
        self.nonce = Some(nonce + 1);
        crate::metrics::set_nonce("ethereum", nonce + 1);
        crate::metrics::record_package("delivered");
        info!(
            parachain_block = package.parachain_block,
            messages = package.entries.len(),
            tx_hash = %tx_hash,
            nonce,
            "Message package delivered"
        );
        Ok(Delivery::Delivered)
    }
}
