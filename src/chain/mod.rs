//! Chain connections and the collaborator interfaces the relays call through

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::retry::{sleep_or_cancel, RetryAction, RetryPolicy};

pub mod beacon;
pub mod ethereum;
pub mod parachain;
pub mod relaychain;
pub mod rpc;
pub mod scale;

pub use beacon::{BeaconApi, HttpBeaconClient};
pub use ethereum::{AlloyInboundChannel, InboundChannelApi};
pub use parachain::{ExtrinsicSigner, HttpParachainClient, ParachainApi, RemoteSigner};
pub use relaychain::{HttpRelayChainClient, RelayChainApi};

/// A session with one chain endpoint
#[async_trait]
pub trait ChainConnection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Establish the session; fails with a transport error if the endpoint is unreachable
    async fn connect(&self) -> Result<()>;

    /// Close the session. Idempotent; later requests fail with `ConnectionClosed`.
    fn close(&self);
}

/// Connect with the retry policy. Returns `Ok(false)` if cancelled first.
pub async fn connect_with_retry<C>(
    conn: &C,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<bool>
where
    C: ChainConnection + ?Sized,
{
    let mut failures = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match conn.connect().await {
            Ok(()) => {
                info!(chain = conn.name(), "Connected");
                return Ok(true);
            }
            Err(e) => {
                failures += 1;
                match policy.decide(failures, &e) {
                    RetryAction::RetryAfter(backoff) => {
                        warn!(
                            chain = conn.name(),
                            attempt = failures,
                            ?backoff,
                            error = %e,
                            "Connection failed, retrying"
                        );
                        if !sleep_or_cancel(backoff, cancel).await {
                            return Ok(false);
                        }
                    }
                    RetryAction::GiveUp => return Err(policy.exhausted("connect", failures, e)),
                }
            }
        }
    }
}
