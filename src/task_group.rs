//! Cancellable task group
//!
//! Every task shares one cancellation token. The first task to fail records its error
//! and cancels the token; `wait` drains the remaining tasks and returns that error.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{RelayError, Result};

pub struct TaskGroup {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    first_error: Arc<OnceLock<RelayError>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Group whose token is cancelled when `cancel` is (e.g. on a shutdown signal)
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
            first_error: Arc::new(OnceLock::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a task; an `Err` outcome cancels every sibling
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let first_error = self.first_error.clone();
        debug!(task = name, "Spawning task");

        self.tasks.spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "Task finished"),
                Err(e) => {
                    error!(task = name, error = %e, "Task failed, cancelling group");
                    crate::metrics::record_error(name, e.kind());
                    let _ = first_error.set(e);
                    cancel.cancel();
                }
            }
        });
    }

    /// Wait for all tasks and return the first error, if any
    pub async fn wait(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(join_err) = joined {
                let message = if join_err.is_panic() {
                    "task panicked".to_string()
                } else {
                    join_err.to_string()
                };
                error!(error = %message, "Task aborted, cancelling group");
                let _ = self.first_error.set(RelayError::Task {
                    name: "unknown",
                    message,
                });
                self.cancel.cancel();
            }
        }

        match Arc::try_unwrap(self.first_error)
            .ok()
            .and_then(OnceLock::into_inner)
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_ok() {
        let mut group = TaskGroup::new();
        group.spawn("a", async { Ok(()) });
        group.spawn("b", async { Ok(()) });
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let mut group = TaskGroup::new();
        let observed = Arc::new(AtomicBool::new(false));

        let token = group.token();
        let flag = observed.clone();
        group.spawn("sibling", async move {
            tokio::select! {
                _ = token.cancelled() => {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
            }
        });
        group.spawn("failing", async {
            Err(RelayError::verification("bad proof"))
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, RelayError::Verification(_)));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_only_first_error_is_kept() {
        let mut group = TaskGroup::new();
        let token = group.token();

        group.spawn("first", async {
            Err(RelayError::SubmissionTimeout { attempts: 3 })
        });
        group.spawn("second", async move {
            token.cancelled().await;
            Err(RelayError::ConnectionClosed("ethereum"))
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, RelayError::SubmissionTimeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut group = TaskGroup::new();
        group.spawn("panicking", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, RelayError::Task { .. }));
    }
}
