//! Beacon light client syncer
//!
//! Bootstraps from a trusted block root, rolls the sync committee forward one period at a
//! time, then follows finality. Every payload is checked against the beacon state root
//! before it is handed out; the aggregate BLS signature is left to the destination pallet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::merkle::{
    hash_tree_root_header, hash_tree_root_sync_committee, is_valid_merkle_branch, StateGindices,
};
use crate::chain::beacon::{LightClientFinalityUpdate, LightClientUpdate};
use crate::chain::BeaconApi;
use crate::error::{RelayError, Result};
use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::types::{
    BeaconHeader, ChainSpec, CommitteeRotation, FinalizedHeaderUpdate, InitialSync, SyncPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    InitialSynced,
    CommitteeCatchingUp,
    Following,
    Failed,
}

pub struct BeaconSyncer {
    api: Arc<dyn BeaconApi>,
    spec: ChainSpec,
    retry: RetryPolicy,
    poll_interval: Duration,
    state: SyncState,
    /// Reason for entering `Failed`
    failure: Option<String>,
    /// Highest period whose committee rotation was handed out
    rotated_period: Option<u64>,
    /// Period of the last payload handed out
    emitted_period: u64,
    last_finalized_slot: u64,
}

impl BeaconSyncer {
    pub fn new(
        api: Arc<dyn BeaconApi>,
        spec: ChainSpec,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            spec,
            retry,
            poll_interval,
            state: SyncState::Uninitialized,
            failure: None,
            rotated_period: None,
            emitted_period: 0,
            last_finalized_slot: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    /// Snapshot sync from `trusted_block_root`.
    ///
    /// Transport errors are retried; returns `Ok(None)` if cancelled while backing off.
    pub async fn initial_sync(
        &mut self,
        trusted_block_root: B256,
        cancel: &CancellationToken,
    ) -> Result<Option<SyncPayload>> {
        self.check_failed()?;

        let api = &self.api;
        let spec = self.spec;
        let fetched = self
            .retry
            .run("beacon_bootstrap", cancel, || {
                fetch_initial(api.as_ref(), &spec, trusted_block_root)
            })
            .await;

        let initial = match fetched {
            Ok(Some(initial)) => initial,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.fail(e)),
        };

        let period = self.spec.sync_period(initial.header.slot);
        self.state = SyncState::InitialSynced;
        self.emitted_period = period;
        self.last_finalized_slot = initial.header.slot;
        crate::metrics::set_sync_period(period);
        crate::metrics::set_finalized_slot(initial.header.slot);
        info!(
            slot = initial.header.slot,
            period,
            root = %trusted_block_root,
            "Initial sync verified"
        );

        Ok(Some(SyncPayload::Initial(initial)))
    }

    /// Committee rotations from the period of `from_slot` up to the chain's current period
    pub fn committee_updates(&mut self, from_slot: u64) -> CommitteeUpdates<'_> {
        let next_period = self.spec.sync_period(from_slot);
        if self.state == SyncState::InitialSynced {
            self.state = SyncState::CommitteeCatchingUp;
        }
        CommitteeUpdates {
            syncer: self,
            next_period,
            target_period: None,
        }
    }

    /// Unbounded sequence of finalized header updates, preceded by any rotation they need
    pub fn finalized_updates(&mut self) -> FinalizedUpdates<'_> {
        FinalizedUpdates {
            syncer: self,
            pending: VecDeque::new(),
            polled: false,
        }
    }

    fn check_failed(&self) -> Result<()> {
        match (&self.state, &self.failure) {
            (SyncState::Failed, Some(reason)) => Err(RelayError::Verification(reason.clone())),
            (SyncState::Failed, None) => Err(RelayError::verification("beacon syncer failed")),
            _ => Ok(()),
        }
    }

    /// Record a fatal proof failure; other errors pass through untouched
    fn fail(&mut self, error: RelayError) -> RelayError {
        if matches!(
            error,
            RelayError::Verification(_) | RelayError::UntrustedCheckpoint(_)
        ) {
            warn!(error = %error, "Beacon syncer failed");
            self.state = SyncState::Failed;
            self.failure = Some(error.to_string());
        }
        error
    }

    /// Latest attested period according to the finality endpoint
    async fn current_period(&self, cancel: &CancellationToken) -> Result<Option<u64>> {
        let api = &self.api;
        let update = self
            .retry
            .run("beacon_finality_update", cancel, || api.finality_update())
            .await?;
        Ok(update.map(|u| self.spec.sync_period(u.attested_header.beacon.slot)))
    }

    async fn fetch_rotation(
        &self,
        period: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<CommitteeRotation>> {
        let api = &self.api;
        let updates = self
            .retry
            .run("beacon_updates", cancel, || async move {
                let mut updates = api.updates(period, 1).await?;
                updates.pop().ok_or_else(|| {
                    RelayError::transport("beacon", format!("no light client update for period {}", period))
                })
            })
            .await?;
        let Some(update) = updates else {
            return Ok(None);
        };
        verify_rotation(&self.spec, &update, period)?;

        let fork_version = self
            .retry
            .run("beacon_fork", cancel, || {
                api.fork_version(update.attested_header.beacon.slot)
            })
            .await?;
        let Some(fork_version) = fork_version else {
            return Ok(None);
        };

        Ok(Some(CommitteeRotation {
            attested_header: update.attested_header.beacon,
            next_sync_committee: update.next_sync_committee,
            next_sync_committee_branch: update.next_sync_committee_branch,
            finalized_header: update.finalized_header.beacon,
            finality_branch: update.finality_branch,
            sync_aggregate: update.sync_aggregate,
            fork_version,
            sync_committee_period: period,
        }))
    }

    fn record_rotation(&mut self, rotation: &CommitteeRotation) {
        let period = rotation.sync_committee_period;
        self.rotated_period = Some(period);
        self.emitted_period = self.emitted_period.max(period);
        crate::metrics::set_sync_period(period);
        info!(
            period,
            attested_slot = rotation.attested_header.slot,
            "Sync committee rotation verified"
        );
    }
}

async fn fetch_initial(
    api: &dyn BeaconApi,
    spec: &ChainSpec,
    trusted_block_root: B256,
) -> Result<InitialSync> {
    let bootstrap = api.bootstrap(trusted_block_root).await?;
    let header = bootstrap.header.beacon;

    let header_root = hash_tree_root_header(&header);
    if header_root != trusted_block_root {
        return Err(RelayError::verification(format!(
            "bootstrap header root {} does not match trusted root {}",
            header_root, trusted_block_root
        )));
    }

    let gindices = StateGindices::for_slot(spec, header.slot);
    let committee_root = hash_tree_root_sync_committee(&bootstrap.current_sync_committee);
    if !is_valid_merkle_branch(
        committee_root,
        &bootstrap.current_sync_committee_branch,
        gindices.current_sync_committee,
        header.state_root,
    ) {
        return Err(RelayError::verification(format!(
            "current sync committee branch invalid at slot {}",
            header.slot
        )));
    }

    let validators_root = api.genesis_validators_root().await?;
    Ok(InitialSync {
        header,
        current_sync_committee: bootstrap.current_sync_committee,
        current_sync_committee_branch: bootstrap.current_sync_committee_branch,
        validators_root,
    })
}

fn verify_rotation(spec: &ChainSpec, update: &LightClientUpdate, period: u64) -> Result<()> {
    let attested = &update.attested_header.beacon;
    let attested_period = spec.sync_period(attested.slot);
    if attested_period != period {
        return Err(RelayError::verification(format!(
            "update for period {} is attested in period {}",
            period, attested_period
        )));
    }

    if !update.sync_aggregate.has_supermajority() {
        return Err(RelayError::verification(format!(
            "committee update for period {} signed by {} of {} members",
            period,
            update.sync_aggregate.participants(),
            update.sync_aggregate.committee_size()
        )));
    }

    let gindices = StateGindices::for_slot(spec, attested.slot);
    let committee_root = hash_tree_root_sync_committee(&update.next_sync_committee);
    if !is_valid_merkle_branch(
        committee_root,
        &update.next_sync_committee_branch,
        gindices.next_sync_committee,
        attested.state_root,
    ) {
        return Err(RelayError::verification(format!(
            "next sync committee branch invalid for period {}",
            period
        )));
    }

    verify_finality(
        &gindices,
        &update.finalized_header.beacon,
        &update.finality_branch,
        attested.state_root,
    )
}

fn verify_finality(
    gindices: &StateGindices,
    finalized: &BeaconHeader,
    branch: &[B256],
    attested_state_root: B256,
) -> Result<()> {
    if !is_valid_merkle_branch(
        hash_tree_root_header(finalized),
        branch,
        gindices.finalized_root,
        attested_state_root,
    ) {
        return Err(RelayError::verification(format!(
            "finality branch invalid for finalized slot {}",
            finalized.slot
        )));
    }
    Ok(())
}

/// Lazy sequence of committee rotations; the next one is fetched only when asked for
pub struct CommitteeUpdates<'a> {
    syncer: &'a mut BeaconSyncer,
    next_period: u64,
    target_period: Option<u64>,
}

impl CommitteeUpdates<'_> {
    /// `None` once the tracked period reaches the chain's current period, or on cancellation
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Result<SyncPayload>> {
        if let Err(e) = self.syncer.check_failed() {
            return Some(Err(e));
        }
        if cancel.is_cancelled() {
            return None;
        }

        let target = match self.target_period {
            Some(target) if self.next_period <= target => target,
            // Re-read the head once the known target is reached; it may have moved on
            _ => match self.syncer.current_period(cancel).await {
                Ok(Some(target)) => {
                    self.target_period = Some(target);
                    target
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(self.syncer.fail(e))),
            },
        };

        if self.next_period > target {
            debug!(period = target, "Committee caught up with chain");
            self.syncer.state = SyncState::Following;
            return None;
        }

        let period = self.next_period;
        match self.syncer.fetch_rotation(period, cancel).await {
            Ok(Some(rotation)) => {
                self.syncer.record_rotation(&rotation);
                self.next_period += 1;
                Some(Ok(SyncPayload::CommitteeRotation(rotation)))
            }
            Ok(None) => None,
            Err(e) => Some(Err(self.syncer.fail(e))),
        }
    }
}

/// Cancellable, unbounded sequence of finalized header payloads
pub struct FinalizedUpdates<'a> {
    syncer: &'a mut BeaconSyncer,
    pending: VecDeque<SyncPayload>,
    polled: bool,
}

impl FinalizedUpdates<'_> {
    /// Next payload; `None` only on cancellation
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Result<SyncPayload>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Some(Ok(payload));
            }
            if let Err(e) = self.syncer.check_failed() {
                return Some(Err(e));
            }

            if self.polled && !sleep_or_cancel(self.syncer.poll_interval, cancel).await {
                return None;
            }
            self.polled = true;

            let api = &self.syncer.api;
            let fetched = self
                .syncer
                .retry
                .run("beacon_finality_update", cancel, || api.finality_update())
                .await;
            let update = match fetched {
                Ok(Some(update)) => update,
                Ok(None) => return None,
                Err(e) => return Some(Err(self.syncer.fail(e))),
            };

            match self.accept(update, cancel).await {
                Ok(true) => continue,
                Ok(false) => {
                    if cancel.is_cancelled() {
                        return None;
                    }
                }
                Err(e) => return Some(Err(self.syncer.fail(e))),
            }
        }
    }

    /// Queue the payloads `update` yields; `Ok(false)` if it was skipped
    async fn accept(
        &mut self,
        update: LightClientFinalityUpdate,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let spec = self.syncer.spec;
        let finalized_slot = update.finalized_header.beacon.slot;
        if finalized_slot <= self.syncer.last_finalized_slot {
            debug!(
                slot = finalized_slot,
                last = self.syncer.last_finalized_slot,
                "No new finalized header"
            );
            return Ok(false);
        }

        if !update.sync_aggregate.has_supermajority() {
            debug!(
                slot = finalized_slot,
                participants = update.sync_aggregate.participants(),
                size = update.sync_aggregate.committee_size(),
                "Finality update lacks supermajority, waiting for a later one"
            );
            return Ok(false);
        }

        let attested = &update.attested_header.beacon;
        let gindices = StateGindices::for_slot(&spec, attested.slot);
        verify_finality(
            &gindices,
            &update.finalized_header.beacon,
            &update.finality_branch,
            attested.state_root,
        )?;

        let period = spec.sync_period(attested.slot);
        if period < self.syncer.emitted_period {
            warn!(
                period,
                emitted = self.syncer.emitted_period,
                "Finality update from an earlier period, skipping"
            );
            return Ok(false);
        }

        let first_missing = match self.syncer.rotated_period {
            Some(rotated) => rotated + 1,
            None => self.syncer.emitted_period,
        };
        for missing in first_missing..=period {
            let Some(rotation) = self.syncer.fetch_rotation(missing, cancel).await? else {
                return Ok(false);
            };
            self.syncer.record_rotation(&rotation);
            self.pending.push_back(SyncPayload::CommitteeRotation(rotation));
        }

        let api = &self.syncer.api;
        let Some(fork_version) = self
            .syncer
            .retry
            .run("beacon_fork", cancel, || api.fork_version(attested.slot))
            .await?
        else {
            return Ok(false);
        };

        self.syncer.last_finalized_slot = finalized_slot;
        self.syncer.emitted_period = period;
        self.syncer.state = SyncState::Following;
        crate::metrics::set_finalized_slot(finalized_slot);
        debug!(slot = finalized_slot, period, "Finalized header verified");

        self.pending.push_back(SyncPayload::FinalizedHeader(FinalizedHeaderUpdate {
            attested_header: update.attested_header.beacon,
            finalized_header: update.finalized_header.beacon,
            finality_branch: update.finality_branch,
            sync_aggregate: update.sync_aggregate,
            fork_version,
            period,
        }));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::beacon::{LightClientBootstrap, LightClientHeader};
    use crate::chain::ChainConnection;
    use crate::types::{ForkVersion, SyncAggregate, SyncCommittee};
    use crate::watchers::merkle::tests::state_with;
    use alloy::primitives::{Bytes, FixedBytes};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const SLOTS_PER_PERIOD: u64 = 32 * 256;

    fn committee(seed: u8) -> SyncCommittee {
        SyncCommittee {
            pubkeys: (0..4).map(|i| FixedBytes::repeat_byte(seed + i)).collect(),
            aggregate_pubkey: FixedBytes::repeat_byte(seed),
        }
    }

    fn aggregate(participating: bool) -> SyncAggregate {
        SyncAggregate {
            sync_committee_bits: Bytes::from(vec![if participating { 0xff } else { 0x01 }; 64]),
            sync_committee_signature: Bytes::from(vec![0xaa; 96]),
        }
    }

    fn header(slot: u64, state_root: B256) -> BeaconHeader {
        BeaconHeader {
            slot,
            proposer_index: 7,
            parent_root: B256::repeat_byte(1),
            state_root,
            body_root: B256::repeat_byte(2),
        }
    }

    fn bootstrap(slot: u64) -> (B256, LightClientBootstrap) {
        let current = committee(10);
        let (state_root, branches) = state_with(&[(
            StateGindices::ALTAIR.current_sync_committee,
            hash_tree_root_sync_committee(&current),
        )]);
        let header = header(slot, state_root);
        let root = hash_tree_root_header(&header);
        let bootstrap = LightClientBootstrap {
            header: LightClientHeader { beacon: header },
            current_sync_committee: current,
            current_sync_committee_branch: branches[0].clone(),
        };
        (root, bootstrap)
    }

    fn update(attested_slot: u64, finalized_slot: u64, participating: bool) -> LightClientUpdate {
        let next = committee(40);
        let finalized = header(finalized_slot, B256::repeat_byte(3));
        let (state_root, branches) = state_with(&[
            (
                StateGindices::ALTAIR.next_sync_committee,
                hash_tree_root_sync_committee(&next),
            ),
            (StateGindices::ALTAIR.finalized_root, hash_tree_root_header(&finalized)),
        ]);
        LightClientUpdate {
            attested_header: LightClientHeader {
                beacon: header(attested_slot, state_root),
            },
            next_sync_committee: next,
            next_sync_committee_branch: branches[0].clone(),
            finalized_header: LightClientHeader { beacon: finalized },
            finality_branch: branches[1].clone(),
            sync_aggregate: aggregate(participating),
            signature_slot: attested_slot + 1,
        }
    }

    fn finality(from: &LightClientUpdate) -> LightClientFinalityUpdate {
        LightClientFinalityUpdate {
            attested_header: from.attested_header.clone(),
            finalized_header: from.finalized_header.clone(),
            finality_branch: from.finality_branch.clone(),
            sync_aggregate: from.sync_aggregate.clone(),
            signature_slot: from.signature_slot,
        }
    }

    #[derive(Default)]
    struct MockBeacon {
        bootstrap: Mutex<Option<LightClientBootstrap>>,
        updates: Mutex<Vec<LightClientUpdate>>,
        finality: Mutex<VecDeque<LightClientFinalityUpdate>>,
        update_calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ChainConnection for MockBeacon {
        fn name(&self) -> &'static str {
            "beacon"
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }

    #[async_trait]
    impl BeaconApi for MockBeacon {
        async fn bootstrap(&self, block_root: B256) -> Result<LightClientBootstrap> {
            self.bootstrap
                .lock()
                .unwrap()
                .clone()
                .ok_or(RelayError::UntrustedCheckpoint(block_root))
        }
        async fn updates(&self, start_period: u64, _count: u64) -> Result<Vec<LightClientUpdate>> {
            self.update_calls.lock().unwrap().push(start_period);
            Ok(self
                .updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.attested_header.beacon.slot / SLOTS_PER_PERIOD == start_period)
                .cloned()
                .collect())
        }
        async fn finality_update(&self) -> Result<LightClientFinalityUpdate> {
            let mut queue = self.finality.lock().unwrap();
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue
                    .front()
                    .cloned()
                    .ok_or_else(|| RelayError::transport("beacon", "no finality update"))
            }
        }
        async fn genesis_validators_root(&self) -> Result<B256> {
            Ok(B256::repeat_byte(0x99))
        }
        async fn fork_version(&self, _slot: u64) -> Result<ForkVersion> {
            Ok([4, 0, 0, 0])
        }
    }

    fn syncer(api: Arc<MockBeacon>) -> BeaconSyncer {
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        };
        BeaconSyncer::new(api, ChainSpec::default(), retry, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_initial_sync_verifies_root() {
        let api = Arc::new(MockBeacon::default());
        let (root, bootstrap) = bootstrap(100);
        *api.bootstrap.lock().unwrap() = Some(bootstrap);
        let mut syncer = syncer(api);
        let cancel = CancellationToken::new();

        let payload = syncer.initial_sync(root, &cancel).await.unwrap().unwrap();
        assert_eq!(payload.header_slot(), 100);
        assert_eq!(syncer.state(), SyncState::InitialSynced);
        match payload {
            SyncPayload::Initial(initial) => {
                assert_eq!(initial.validators_root, B256::repeat_byte(0x99))
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_sync_wrong_root_fails_terminally() {
        let api = Arc::new(MockBeacon::default());
        let (_, bootstrap) = bootstrap(100);
        *api.bootstrap.lock().unwrap() = Some(bootstrap);
        let mut syncer = syncer(api);
        let cancel = CancellationToken::new();

        let err = syncer
            .initial_sync(B256::repeat_byte(0xee), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Verification(_)));
        assert_eq!(syncer.state(), SyncState::Failed);

        // Failed is terminal
        let again = syncer.committee_updates(100).next(&cancel).await;
        assert!(matches!(again, Some(Err(RelayError::Verification(_)))));
    }

    #[tokio::test]
    async fn test_unknown_checkpoint() {
        let api = Arc::new(MockBeacon::default());
        let mut syncer = syncer(api);
        let err = syncer
            .initial_sync(B256::repeat_byte(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UntrustedCheckpoint(_)));
    }

    #[tokio::test]
    async fn test_committee_catch_up_reaches_following() {
        let api = Arc::new(MockBeacon::default());
        let (root, bootstrap) = bootstrap(100);
        *api.bootstrap.lock().unwrap() = Some(bootstrap);
        *api.updates.lock().unwrap() = vec![
            update(200, 150, true),
            update(SLOTS_PER_PERIOD + 200, SLOTS_PER_PERIOD + 150, true),
            update(2 * SLOTS_PER_PERIOD + 200, 2 * SLOTS_PER_PERIOD + 150, true),
        ];
        api.finality
            .lock()
            .unwrap()
            .push_back(finality(&update(2 * SLOTS_PER_PERIOD + 300, 2 * SLOTS_PER_PERIOD + 250, true)));

        let mut syncer = syncer(api.clone());
        let cancel = CancellationToken::new();
        syncer.initial_sync(root, &cancel).await.unwrap();

        let mut periods = Vec::new();
        {
            let mut rotations = syncer.committee_updates(100);
            while let Some(payload) = rotations.next(&cancel).await {
                periods.push(payload.unwrap().period(&ChainSpec::default()));
            }
        }
        assert_eq!(periods, vec![0, 1, 2]);
        assert_eq!(syncer.state(), SyncState::Following);
        assert_eq!(*api.update_calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_weak_rotation_is_fatal() {
        let api = Arc::new(MockBeacon::default());
        *api.updates.lock().unwrap() = vec![update(200, 150, false)];
        api.finality
            .lock()
            .unwrap()
            .push_back(finality(&update(300, 250, true)));
        let mut syncer = syncer(api);
        let cancel = CancellationToken::new();

        let result = syncer.committee_updates(0).next(&cancel).await;
        assert!(matches!(result, Some(Err(RelayError::Verification(_)))));
        assert_eq!(syncer.state(), SyncState::Failed);
    }

    #[tokio::test]
    async fn test_finalized_updates_skip_stale_and_weak() {
        let api = Arc::new(MockBeacon::default());
        *api.updates.lock().unwrap() = vec![
            update(200, 150, true),
            update(SLOTS_PER_PERIOD + 200, SLOTS_PER_PERIOD + 150, true),
        ];
        {
            let mut queue = api.finality.lock().unwrap();
            queue.push_back(finality(&update(300, 250, true)));
            // Not newer
            queue.push_back(finality(&update(310, 250, true)));
            // Weak participation
            queue.push_back(finality(&update(400, 350, false)));
            // Next period: rotation first
            queue.push_back(finality(&update(SLOTS_PER_PERIOD + 300, SLOTS_PER_PERIOD + 250, true)));
        }

        let mut syncer = syncer(api);
        syncer.rotated_period = Some(0);
        let cancel = CancellationToken::new();
        let spec = ChainSpec::default();

        let mut updates = syncer.finalized_updates();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let payload = updates.next(&cancel).await.unwrap().unwrap();
            seen.push((payload.kind(), payload.period(&spec), payload.header_slot()));
        }
        assert_eq!(
            seen,
            vec![
                ("finalized_header", 0, 250),
                ("committee_rotation", 1, SLOTS_PER_PERIOD + 150),
                ("finalized_header", 1, SLOTS_PER_PERIOD + 250),
            ]
        );

        cancel.cancel();
        assert!(updates.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_finality_branch_is_fatal() {
        let api = Arc::new(MockBeacon::default());
        let mut bad = finality(&update(300, 250, true));
        bad.finality_branch[0] = B256::repeat_byte(0xbb);
        api.finality.lock().unwrap().push_back(bad);

        let mut syncer = syncer(api);
        syncer.rotated_period = Some(0);
        let cancel = CancellationToken::new();
        let result = syncer.finalized_updates().next(&cancel).await;
        assert!(matches!(result, Some(Err(RelayError::Verification(_)))));
        assert_eq!(syncer.state(), SyncState::Failed);
    }
}
