//! BEEFY commitment listener
//!
//! Polls the relay chain for new BEEFY commitments, checks them against the validator set,
//! resolves the committed parachain head and turns every parachain block carrying basic
//! channel messages into a `MessagePackage`. Each package is proven through the relay block
//! that included its own parachain block.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, B256};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::scale::commitment_of;
use crate::chain::{InboundChannelApi, ParachainApi, RelayChainApi};
use crate::error::{RelayError, Result};
use crate::retry::{sleep_or_cancel, RetryAction, RetryPolicy};
use crate::task_group::TaskGroup;
use crate::types::{
    FinalityCommitment, InclusionProof, MessagePackage, OutboundBundle, ParachainHead,
    ValidatorSet,
};

/// Signatures a set of `validators` must carry: more than two thirds
pub fn signature_threshold(validators: usize) -> usize {
    validators - validators.saturating_sub(1) / 3
}

/// Check every present signature against the validator set.
///
/// Returns the number of valid signatures. A signature that does not recover to its
/// validator is a `Verification` error; too few signatures is `QuorumNotMet`.
pub fn verify_commitment(commitment: &FinalityCommitment, set: &ValidatorSet) -> Result<usize> {
    if set.validators.is_empty() {
        return Err(RelayError::verification(format!(
            "validator set {} is empty",
            set.id
        )));
    }
    if commitment.signatures.len() != set.validators.len() {
        return Err(RelayError::verification(format!(
            "commitment carries {} signature slots for {} validators",
            commitment.signatures.len(),
            set.validators.len()
        )));
    }

    let required = signature_threshold(set.validators.len());
    if commitment.validator_set_id != set.id {
        return Err(RelayError::QuorumNotMet {
            signed: 0,
            required,
        });
    }

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(commitment_of(commitment).hash().0);

    let mut signed = 0;
    for (index, (signature, validator)) in commitment
        .signatures
        .iter()
        .zip(&set.validators)
        .enumerate()
    {
        let Some(signature) = signature else {
            continue;
        };
        let v = signature[64];
        let recovery_id = RecoveryId::from_i32(i32::from(if v >= 27 { v - 27 } else { v }))
            .map_err(|e| RelayError::verification(format!("signature {}: {}", index, e)))?;
        let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
            .map_err(|e| RelayError::verification(format!("signature {}: {}", index, e)))?;
        let recovered = secp
            .recover_ecdsa(&message, &recoverable)
            .map_err(|e| RelayError::verification(format!("signature {}: {}", index, e)))?;

        if recovered.serialize() != *validator {
            return Err(RelayError::verification(format!(
                "signature {} was not made by validator {}",
                index,
                hex::encode(validator)
            )));
        }
        signed += 1;
    }

    if signed < required {
        return Err(RelayError::QuorumNotMet { signed, required });
    }
    Ok(signed)
}

pub struct CommitmentListener {
    relay: Arc<dyn RelayChainApi>,
    parachain: Arc<dyn ParachainApi>,
    channel: Arc<dyn InboundChannelApi>,
    para_id: u32,
    poll_interval: Duration,
    retry: RetryPolicy,
    sender: mpsc::Sender<MessagePackage>,
    last_head: Option<B256>,
    last_commitment_block: u32,
    /// Highest parachain block whose messages were handed off or found empty
    last_scanned: u32,
}

impl CommitmentListener {
    pub fn new(
        relay: Arc<dyn RelayChainApi>,
        parachain: Arc<dyn ParachainApi>,
        channel: Arc<dyn InboundChannelApi>,
        para_id: u32,
        poll_interval: Duration,
        retry: RetryPolicy,
        sender: mpsc::Sender<MessagePackage>,
    ) -> Self {
        Self {
            relay,
            parachain,
            channel,
            para_id,
            poll_interval,
            retry,
            sender,
            last_head: None,
            last_commitment_block: 0,
            last_scanned: 0,
        }
    }

    pub fn start(self, group: &mut TaskGroup) {
        let cancel = group.token();
        group.spawn("commitment_listener", self.run(cancel));
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let channel = &self.channel;
        let latest = self
            .retry
            .run("latest_parachain_block", &cancel, || {
                channel.latest_parachain_block()
            })
            .await?;
        let Some(latest) = latest else {
            return Ok(());
        };
        self.last_scanned = latest;
        info!(
            para_id = self.para_id,
            from_block = latest + 1,
            "Commitment listener started"
        );

        let mut failures = 0u32;
        loop {
            match self.poll(&cancel).await {
                Ok(true) => failures = 0,
                Ok(false) => return Ok(()),
                Err(e) => {
                    failures += 1;
                    match self.retry.decide(failures, &e) {
                        RetryAction::RetryAfter(backoff) => {
                            warn!(attempt = failures, ?backoff, error = %e, "Commitment poll failed");
                            crate::metrics::record_retry("beefy_poll");
                            if !sleep_or_cancel(backoff, &cancel).await {
                                return Ok(());
                            }
                            continue;
                        }
                        RetryAction::GiveUp => {
                            return Err(self.retry.exhausted("beefy_poll", failures, e))
                        }
                    }
                }
            }

            if !sleep_or_cancel(self.poll_interval, &cancel).await {
                return Ok(());
            }
        }
    }

    /// Handle the latest BEEFY commitment; `Ok(false)` on cancellation
    async fn poll(&mut self, cancel: &CancellationToken) -> Result<bool> {
        let head = self.relay.finalized_beefy_head().await?;
        if self.last_head == Some(head) {
            return Ok(true);
        }

        let Some(commitment) = self.relay.finality_commitment(head).await? else {
            debug!(block = %head, "BEEFY head carries no justification");
            self.last_head = Some(head);
            return Ok(true);
        };
        self.last_head = Some(head);

        if commitment.block_number <= self.last_commitment_block {
            return Ok(true);
        }

        let set = self.validator_set_for(&commitment).await?;
        let verified = match set {
            Some(set) => verify_commitment(&commitment, &set),
            None => Err(RelayError::QuorumNotMet {
                signed: 0,
                required: signature_threshold(commitment.signatures.len()),
            }),
        };
        match verified {
            Ok(signed) => {
                crate::metrics::record_commitment("verified");
                debug!(
                    block_number = commitment.block_number,
                    validator_set_id = commitment.validator_set_id,
                    signed,
                    "BEEFY commitment verified"
                );
            }
            Err(RelayError::QuorumNotMet { signed, required }) => {
                crate::metrics::record_commitment("skipped");
                warn!(
                    block_number = commitment.block_number,
                    validator_set_id = commitment.validator_set_id,
                    signed,
                    required,
                    "BEEFY commitment below quorum, waiting for a later one"
                );
                return Ok(true);
            }
            Err(e) => return Err(e),
        }
        self.last_commitment_block = commitment.block_number;

        let Some(para_head) = self
            .relay
            .parachain_head(self.para_id, commitment.block_hash)
            .await?
        else {
            debug!(para_id = self.para_id, "No parachain head at committed relay block");
            return Ok(true);
        };

        match self.parachain.block_hash(para_head.number).await? {
            None => {
                debug!(number = para_head.number, "Parachain node has not imported committed head yet");
                return Ok(true);
            }
            Some(hash) if hash != para_head.hash => {
                return Err(RelayError::verification(format!(
                    "parachain block {} is {} but relay chain committed {}",
                    para_head.number, hash, para_head.hash
                )));
            }
            Some(_) => {}
        }

        self.scan(&commitment, &para_head, cancel).await
    }

    /// Validator set for the commitment, looking at the parent block on a set change
    async fn validator_set_for(&self, commitment: &FinalityCommitment) -> Result<Option<ValidatorSet>> {
        if let Some(set) = self.relay.validator_set(commitment.block_hash).await? {
            if set.id == commitment.validator_set_id {
                return Ok(Some(set));
            }
        }
        let parent = self.relay.parent_hash(commitment.block_hash).await?;
        let set = self.relay.validator_set(parent).await?;
        Ok(set.filter(|s| s.id == commitment.validator_set_id))
    }

    async fn scan(
        &mut self,
        commitment: &FinalityCommitment,
        para_head: &ParachainHead,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut pending = Vec::new();
        for number in self.last_scanned.saturating_add(1)..=para_head.number {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let hash = if number == para_head.number {
                para_head.hash
            } else {
                self.parachain
                    .block_hash(number)
                    .await?
                    .ok_or_else(|| RelayError::decode(format!("parachain block {} not found", number)))?
            };

            let bundle = match self.parachain.outbound_bundle(hash).await? {
                Some(bundle) if !bundle.messages.is_empty() => bundle,
                _ => continue,
            };

            let leaf_proofs = self.parachain.merkle_proofs(bundle.commitment_hash).await?;
            if leaf_proofs.len() != bundle.messages.len() {
                return Err(RelayError::decode(format!(
                    "{} merkle proofs for {} messages in parachain block {}",
                    leaf_proofs.len(),
                    bundle.messages.len(),
                    number
                )));
            }

            pending.push(PendingBlock {
                number,
                hash,
                bundle,
                leaf_proofs,
            });
        }

        let inclusions = self.resolve_inclusions(commitment, para_head, &pending).await?;
        let beefy_commitment_hash = commitment_of(commitment).hash();

        for (block, inclusion) in pending.into_iter().zip(inclusions) {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            // Leaf of relay block n sits at index n - 1, proven against the committed root
            let mmr = self
                .relay
                .mmr_proof(inclusion.relay_block_number.saturating_sub(1), commitment.block_hash)
                .await?;

            let package = MessagePackage {
                parachain_block: block.number,
                parachain_block_hash: block.hash,
                entries: block.bundle.messages,
                proof: InclusionProof {
                    commitment_hash: block.bundle.commitment_hash,
                    leaf_proofs: block.leaf_proofs,
                    parachain_head: inclusion.head.header,
                    relay_block_number: inclusion.relay_block_number,
                    relay_block_hash: inclusion.relay_block_hash,
                    beefy_commitment_hash,
                    mmr,
                },
            };
            let messages = package.entries.len();

            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                sent = self.sender.send(package) => {
                    sent.map_err(|_| RelayError::ConnectionClosed("message package channel"))?;
                }
            }

            self.last_scanned = block.number;
            crate::metrics::record_package("produced");
            info!(
                parachain_block = block.number,
                messages,
                relay_block = inclusion.relay_block_number,
                commitment_block = commitment.block_number,
                "Message package handed off"
            );
        }

        self.last_scanned = para_head.number;
        Ok(true)
    }

    /// Find, for every pending block, the relay block whose `Paras.Heads` entry is that block.
    ///
    /// Walks parent hashes back from the committed relay block, so every returned relay block
    /// is covered by the commitment's MMR root. `pending` is in ascending order, and so is the
    /// result.
    async fn resolve_inclusions(
        &self,
        commitment: &FinalityCommitment,
        para_head: &ParachainHead,
        pending: &[PendingBlock],
    ) -> Result<Vec<Inclusion>> {
        let mut relay_block_number = commitment.block_number;
        let mut relay_block_hash = commitment.block_hash;
        let mut head = para_head.clone();
        let mut found = Vec::with_capacity(pending.len());

        for block in pending.iter().rev() {
            while head.number > block.number {
                if relay_block_number == 0 {
                    return Err(RelayError::verification(format!(
                        "parachain block {} is not the head of any relay block",
                        block.number
                    )));
                }
                relay_block_hash = self.relay.parent_hash(relay_block_hash).await?;
                relay_block_number -= 1;
                head = self
                    .relay
                    .parachain_head(self.para_id, relay_block_hash)
                    .await?
                    .ok_or_else(|| {
                        RelayError::verification(format!(
                            "relay block {} has no head for para {}",
                            relay_block_number, self.para_id
                        ))
                    })?;
            }

            if head.number != block.number || head.hash != block.hash {
                return Err(RelayError::verification(format!(
                    "relay block {} heads parachain block {} ({}), expected {} ({})",
                    relay_block_number, head.number, head.hash, block.number, block.hash
                )));
            }
            debug!(
                parachain_block = block.number,
                relay_block = relay_block_number,
                "Resolved including relay block"
            );
            found.push(Inclusion {
                relay_block_number,
                relay_block_hash,
                head: head.clone(),
            });
        }

        found.reverse();
        Ok(found)
    }
}

/// Parachain block with messages, waiting for its inclusion proof
struct PendingBlock {
    number: u32,
    hash: B256,
    bundle: OutboundBundle,
    leaf_proofs: Vec<Bytes>,
}

/// Relay block whose parachain head is a pending block
struct Inclusion {
    relay_block_number: u32,
    relay_block_hash: B256,
    head: ParachainHead,
}
