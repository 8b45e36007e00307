//! Relay error taxonomy and raw RPC error classification

use alloy::primitives::B256;
use thiserror::Error;

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Connectivity failure against an endpoint; retryable
    #[error("transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The trusted checkpoint root could not be resolved by the beacon node
    #[error("untrusted checkpoint {0}")]
    UntrustedCheckpoint(B256),

    /// A proof or signature check failed; never retried
    #[error("verification failed: {0}")]
    Verification(String),

    /// Not enough valid signatures on a finality commitment
    #[error("quorum not met: {signed} valid signatures, {required} required")]
    QuorumNotMet { signed: usize, required: usize },

    #[error("submission not included after {attempts} inclusion checks")]
    SubmissionTimeout { attempts: u32 },

    #[error("contract rejected submission: {0}")]
    ContractRejected(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<RelayError>,
    },

    #[error("connection {0} is closed")]
    ConnectionClosed(&'static str),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("task {name} failed: {message}")]
    Task { name: &'static str, message: String },
}

impl RelayError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(message: impl ToString) -> Self {
        Self::Decode(message.to_string())
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification(message.into())
    }

    /// Whether a retry can change the outcome
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Class of a failed submission, read from the node's message
    pub fn submission_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Transport { message, .. } => Some(classify_error(message)),
            _ => None,
        }
    }

    /// The nonce the submission used is no longer the account's next one
    pub fn is_nonce_mismatch(&self) -> bool {
        matches!(
            self.submission_class(),
            Some(ErrorClass::NonceTooLow | ErrorClass::NonceTooHigh)
        )
    }

    /// A transaction with the submitted nonce is already waiting in the pool
    pub fn is_already_pending(&self) -> bool {
        matches!(
            self.submission_class(),
            Some(ErrorClass::AlreadyPending | ErrorClass::Underpriced)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::UntrustedCheckpoint(_) => "untrusted_checkpoint",
            Self::Verification(_) => "verification",
            Self::QuorumNotMet { .. } => "quorum_not_met",
            Self::SubmissionTimeout { .. } => "submission_timeout",
            Self::ContractRejected(_) => "contract_rejected",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::Decode(_) => "decode",
            Self::Task { .. } => "task",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_decode() {
            return Self::Decode(format!("{} ({})", err, endpoint));
        }
        Self::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}

impl From<codec::Error> for RelayError {
    fn from(err: codec::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Classifies raw RPC error strings for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Transaction underpriced; retry once the fee estimate is refreshed
    Underpriced,
    /// The same transaction is already in the pool
    AlreadyPending,
    /// Nonce already used; refresh from chain
    NonceTooLow,
    /// Nonce ahead of chain; wait for pending transactions
    NonceTooHigh,
    /// Contract or runtime rejection; do not retry
    Permanent,
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Checked first; a revert reason may contain any other marker
    if error_lower.contains("reverted") || error_lower.contains("execution reverted") {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("already known") || error_lower.contains("already imported") {
        return ErrorClass::AlreadyPending;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
        || error_lower.contains("priority is too low")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low") || error_lower.contains("stale") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") || error_lower.contains("future") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("bad origin")
        || error_lower.contains("invalid transaction")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Maps a failed submission message onto the relay taxonomy.
///
/// Everything except a permanent rejection stays a retryable `Transport` error. Its message
/// still tells the writer whether the nonce it used is spent.
pub fn submission_error(endpoint: &str, message: String) -> RelayError {
    match classify_error(&message) {
        ErrorClass::Permanent => RelayError::ContractRejected(message),
        _ => RelayError::Transport {
            endpoint: endpoint.to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(
            classify_error("replacement transaction underpriced"),
            ErrorClass::Underpriced
        );
        assert_eq!(classify_error("nonce too low"), ErrorClass::NonceTooLow);
        assert_eq!(
            classify_error("1010: Invalid Transaction: Transaction is outdated (Stale)"),
            ErrorClass::NonceTooLow
        );
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("already known"), ErrorClass::AlreadyPending);
        assert_eq!(
            classify_error("1013: Transaction Already Imported"),
            ErrorClass::AlreadyPending
        );
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_revert_reason_does_not_change_class() {
        assert_eq!(
            classify_error("execution reverted: stale proof"),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_error("server returned an error response: error code 3: execution reverted: future block"),
            ErrorClass::Permanent
        );

        let rejected = submission_error("eth", "failed to send transaction: execution reverted: stale proof".into());
        assert!(matches!(rejected, RelayError::ContractRejected(_)));
        assert_eq!(rejected.kind(), "contract_rejected");
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_nonce_state_from_message() {
        let stale = RelayError::transport("parachain", "1010: Invalid Transaction: Transaction is outdated (Stale)");
        assert!(stale.is_nonce_mismatch());
        assert!(!stale.is_already_pending());

        let pooled = RelayError::transport("eth", "already known");
        assert!(pooled.is_already_pending());
        assert!(!pooled.is_nonce_mismatch());

        let timeout = RelayError::transport("eth", "timed out waiting for receipt of 0x01");
        assert!(!timeout.is_nonce_mismatch());
        assert!(!timeout.is_already_pending());

        assert!(!RelayError::verification("nonce too low").is_nonce_mismatch());
    }

    #[test]
    fn test_submission_error_mapping() {
        let rejected = submission_error("eth", "execution reverted: invalid proof".into());
        assert!(matches!(rejected, RelayError::ContractRejected(_)));
        assert!(!rejected.is_retryable());

        let transient = submission_error("eth", "error sending request: connection reset".into());
        assert!(transient.is_retryable());

        let nonce = submission_error("eth", "nonce too low".into());
        assert!(nonce.is_retryable());
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(RelayError::transport("x", "boom").is_retryable());
        assert!(!RelayError::verification("bad branch").is_retryable());
        assert!(!RelayError::QuorumNotMet { signed: 1, required: 3 }.is_retryable());
        assert!(!RelayError::SubmissionTimeout { attempts: 3 }.is_retryable());
        assert!(!RelayError::ContractRejected("reverted".into()).is_retryable());
    }
}
