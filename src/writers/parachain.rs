//! Parachain writer
//!
//! Submits verified sync payloads to the beacon client pallet, one at a time, and waits
//! for the relayer account's finalized nonce to move past each submission.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::calls::encode_call;
use crate::chain::parachain::BlockRef;
use crate::chain::{ExtrinsicSigner, ParachainApi};
use crate::error::{ErrorClass, RelayError, Result};
use crate::retry::{sleep_or_cancel, RetryAction, RetryPolicy};
use crate::types::{ChainSpec, SyncPayload};

/// Inclusion polling parameters
#[derive(Debug, Clone, Copy)]
pub struct InclusionPolicy {
    pub poll_interval: Duration,
    pub max_checks: u32,
}

pub struct ParachainWriter {
    api: Arc<dyn ParachainApi>,
    signer: Arc<dyn ExtrinsicSigner>,
    account: [u8; 32],
    pallet_index: u8,
    spec: ChainSpec,
    retry: RetryPolicy,
    inclusion: InclusionPolicy,
    nonce: Option<u32>,
}

impl ParachainWriter {
    pub fn new(
        api: Arc<dyn ParachainApi>,
        signer: Arc<dyn ExtrinsicSigner>,
        account: [u8; 32],
        pallet_index: u8,
        spec: ChainSpec,
        retry: RetryPolicy,
        inclusion: InclusionPolicy,
    ) -> Self {
        Self {
            api,
            signer,
            account,
            pallet_index,
            spec,
            retry,
            inclusion,
            nonce: None,
        }
    }

    /// Next nonce this writer will use, once known
    pub fn nonce(&self) -> Option<u32> {
        self.nonce
    }

    /// Read the account nonce; submissions start from here
    pub async fn start(&mut self) -> Result<()> {
        let nonce = self.api.account_nonce(&self.account, BlockRef::Best).await?;
        self.nonce = Some(nonce);
        crate::metrics::set_nonce("parachain", u64::from(nonce));
        info!(account = %hex::encode(self.account), nonce, "Parachain writer ready");
        Ok(())
    }

    async fn current_nonce(&mut self) -> Result<u32> {
        match self.nonce {
            Some(nonce) => Ok(nonce),
            None => {
                let nonce = self.api.account_nonce(&self.account, BlockRef::Best).await?;
                debug!(nonce, "Refreshed parachain nonce");
                self.nonce = Some(nonce);
                Ok(nonce)
            }
        }
    }

    /// Submit `payload` and wait for inclusion.
    ///
    /// Returns `Ok(false)` if cancelled first. The nonce advances by one on success.
    pub async fn write_payload(
        &mut self,
        payload: &SyncPayload,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let call = encode_call(self.pallet_index, payload);
        let mut failures = 0u32;
        // Nonce of an earlier attempt that may have reached the pool
        let mut in_flight: Option<u32> = None;

        let nonce = loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            match self.submit(&call).await {
                Ok(nonce) => break nonce,
                Err(e) => {
                    let reached_chain = e.is_already_pending()
                        || e.submission_class() == Some(ErrorClass::NonceTooLow);
                    if let Some(nonce) = in_flight.filter(|_| reached_chain) {
                        // The earlier attempt is pooled or already in a block
                        debug!(nonce, error = %e, "Earlier submission reached the chain");
                        break nonce;
                    }

                    failures += 1;
                    match self.retry.decide(failures, &e) {
                        RetryAction::RetryAfter(backoff) => {
                            if e.is_nonce_mismatch() {
                                self.nonce = None;
                                in_flight = None;
                            } else {
                                in_flight = self.nonce;
                            }
                            warn!(
                                kind = payload.kind(),
                                attempt = failures,
                                ?backoff,
                                error = %e,
                                "Extrinsic submission failed, retrying"
                            );
                            crate::metrics::record_retry("parachain_submit");
                            if !sleep_or_cancel(backoff, cancel).await {
                                return Ok(false);
                            }
                        }
                        RetryAction::GiveUp => {
                            self.nonce = None;
                            return Err(self.retry.exhausted("parachain_submit", failures, e));
                        }
                    }
                }
            }
        };

        match self.await_inclusion(nonce, cancel).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                self.nonce = None;
                return Err(e);
            }
        }

        self.nonce = Some(nonce + 1);
        crate::metrics::set_nonce("parachain", u64::from(nonce + 1));

        // An included extrinsic can still fail dispatch; every payload stores its header
        let api = &self.api;
        let Some(stored_slot) = self
            .retry
            .run("beacon_slot_check", cancel, || api.latest_finalized_beacon_slot())
            .await?
        else {
            return Ok(false);
        };
        if stored_slot < payload.header_slot() {
            crate::metrics::record_error("parachain_writer", "dispatch_failed");
            error!(
                kind = payload.kind(),
                slot = payload.header_slot(),
                stored_slot,
                nonce,
                "Payload included but its dispatch failed"
            );
            return Err(RelayError::ContractRejected(format!(
                "{} for slot {} included at nonce {} but the pallet holds slot {}",
                payload.kind(),
                payload.header_slot(),
                nonce,
                stored_slot
            )));
        }

        crate::metrics::record_payload_written(payload.kind());
        info!(
            kind = payload.kind(),
            slot = payload.header_slot(),
            period = payload.period(&self.spec),
            nonce,
            "Payload included on parachain"
        );
        Ok(true)
    }

    /// Sign and submit `call`; returns the nonce it was submitted with
    async fn submit(&mut self, call: &[u8]) -> Result<u32> {
        let nonce = self.current_nonce().await?;
        let extrinsic = self.signer.sign(call, nonce).await?;
        let hash = self.api.submit_extrinsic(extrinsic).await?;
        debug!(%hash, nonce, "Extrinsic submitted");
        Ok(nonce)
    }

    /// Poll the finalized nonce until it passes `nonce`
    async fn await_inclusion(&self, nonce: u32, cancel: &CancellationToken) -> Result<bool> {
        for check in 1..=self.inclusion.max_checks {
            if !sleep_or_cancel(self.inclusion.poll_interval, cancel).await {
                return Ok(false);
            }
            match self.api.account_nonce(&self.account, BlockRef::Finalized).await {
                Ok(finalized) if finalized > nonce => return Ok(true),
                Ok(finalized) => debug!(check, finalized, nonce, "Waiting for inclusion"),
                Err(e) if e.is_retryable() => {
                    warn!(check, error = %e, "Inclusion check failed")
                }
                Err(e) => return Err(e),
            }
        }
        Err(RelayError::SubmissionTimeout {
            attempts: self.inclusion.max_checks,
        })
    }
}
