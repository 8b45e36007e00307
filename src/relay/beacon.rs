//! Ethereum to parachain relay: beacon syncer feeding the parachain writer
//!
//! The driver hands one payload at a time to the writer and waits for its
//! acknowledgement before asking the syncer for the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chain::{connect_with_retry, BeaconApi, ExtrinsicSigner, ParachainApi};
use crate::error::{RelayError, Result};
use crate::retry::RetryPolicy;
use crate::task_group::TaskGroup;
use crate::types::{ChainSpec, SyncPayload};
use crate::watchers::BeaconSyncer;
use crate::writers::{InclusionPolicy, ParachainWriter};

type Handoff = (SyncPayload, oneshot::Sender<()>);

#[derive(Debug, Clone)]
pub struct BeaconRelayConfig {
    pub trusted_block_root: B256,
    pub spec: ChainSpec,
    pub poll_interval: Duration,
    pub account: [u8; 32],
    pub pallet_index: u8,
    pub inclusion: InclusionPolicy,
    pub retry: RetryPolicy,
}

pub struct BeaconRelay {
    beacon: Arc<dyn BeaconApi>,
    parachain: Arc<dyn ParachainApi>,
    signer: Arc<dyn ExtrinsicSigner>,
    config: BeaconRelayConfig,
    stopped: AtomicBool,
}

impl BeaconRelay {
    pub fn new(
        beacon: Arc<dyn BeaconApi>,
        parachain: Arc<dyn ParachainApi>,
        signer: Arc<dyn ExtrinsicSigner>,
        config: BeaconRelayConfig,
    ) -> Self {
        Self {
            beacon,
            parachain,
            signer,
            config,
            stopped: AtomicBool::new(false),
        }
    }

    /// Connect, read the writer's nonce, then spawn the driver and writer tasks.
    ///
    /// Spawns nothing if cancelled while connecting.
    pub async fn start(&self, group: &mut TaskGroup) -> Result<()> {
        let cancel = group.token();
        let retry = &self.config.retry;

        if !connect_with_retry(self.beacon.as_ref(), retry, &cancel).await? {
            return Ok(());
        }
        if !connect_with_retry(self.parachain.as_ref(), retry, &cancel).await? {
            return Ok(());
        }

        let mut writer = ParachainWriter::new(
            self.parachain.clone(),
            self.signer.clone(),
            self.config.account,
            self.config.pallet_index,
            self.config.spec,
            retry.clone(),
            self.config.inclusion,
        );
        writer.start().await?;

        let syncer = BeaconSyncer::new(
            self.beacon.clone(),
            self.config.spec,
            retry.clone(),
            self.config.poll_interval,
        );

        let (tx, rx) = mpsc::channel::<Handoff>(1);
        group.spawn(
            "beacon_syncer",
            drive_syncer(syncer, self.config.trusted_block_root, tx, cancel.clone()),
        );
        group.spawn("parachain_writer", run_writer(writer, rx, cancel));
        info!("Beacon relay started");
        Ok(())
    }

    /// Close the beacon and parachain connections. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.beacon.close();
        self.parachain.close();
        info!("Beacon relay stopped");
    }
}

async fn drive_syncer(
    mut syncer: BeaconSyncer,
    trusted_block_root: B256,
    tx: mpsc::Sender<Handoff>,
    cancel: CancellationToken,
) -> Result<()> {
    let spec = *syncer.spec();
    let mut handoff = Monotonic::new(spec, tx);

    let Some(initial) = syncer.initial_sync(trusted_block_root, &cancel).await? else {
        return Ok(());
    };
    let from_slot = initial.header_slot();
    if !handoff.send(initial, &cancel).await? {
        return Ok(());
    }

    {
        let mut rotations = syncer.committee_updates(from_slot);
        while let Some(payload) = rotations.next(&cancel).await {
            if !handoff.send(payload?, &cancel).await? {
                return Ok(());
            }
        }
    }
    if cancel.is_cancelled() {
        return Ok(());
    }
    info!(state = ?syncer.state(), "Following beacon finality");

    let mut updates = syncer.finalized_updates();
    while let Some(payload) = updates.next(&cancel).await {
        if !handoff.send(payload?, &cancel).await? {
            return Ok(());
        }
    }
    Ok(())
}

/// Sends payloads to the writer, refusing any that would move the period backwards
struct Monotonic {
    spec: ChainSpec,
    tx: mpsc::Sender<Handoff>,
    last_period: Option<u64>,
}

impl Monotonic {
    fn new(spec: ChainSpec, tx: mpsc::Sender<Handoff>) -> Self {
        Self {
            spec,
            tx,
            last_period: None,
        }
    }

    /// `Ok(false)` if cancelled or the writer is gone
    async fn send(&mut self, payload: SyncPayload, cancel: &CancellationToken) -> Result<bool> {
        let period = payload.period(&self.spec);
        if let Some(last) = self.last_period {
            if period < last {
                return Err(RelayError::verification(format!(
                    "{} payload for period {} after period {}",
                    payload.kind(),
                    period,
                    last
                )));
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            sent = self.tx.send((payload, ack_tx)) => {
                if sent.is_err() {
                    return Ok(false);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => Ok(false),
            ack = ack_rx => {
                if ack.is_err() {
                    // Writer dropped the payload; its own error is reported by the group
                    return Ok(false);
                }
                self.last_period = Some(period);
                Ok(true)
            }
        }
    }
}

async fn run_writer(
    mut writer: ParachainWriter,
    mut rx: mpsc::Receiver<Handoff>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let (payload, ack) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            item = rx.recv() => match item {
                Some(item) => item,
                None => return Ok(()),
            },
        };

        if !writer.write_payload(&payload, &cancel).await? {
            return Ok(());
        }
        if ack.send(()).is_err() {
            debug!("Syncer stopped waiting for acknowledgement");
        }
    }
}
