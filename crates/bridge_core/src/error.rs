//! Error types for the integration core.
//!
//! Every failure the core can produce is a value. Normalization problems are
//! [`RejectedError`]s, persistence problems are [`StoreError`]s, and anything
//! that goes wrong between the client and the remote control interface ends
//! up as a [`RemoteFailureReason`] inside an `ActionResult`.

use std::sync::Arc;

/// Input that was refused before it reached any stateful component.
///
/// These are always the caller's fault and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectedError {
    /// Nothing was left after trimming
    #[error("identifier is empty")]
    Empty,

    /// The normalized identifier exceeds the allowed length
    #[error("identifier is {len} characters long, maximum is {max}")]
    TooLong { len: usize, max: usize },

    /// The first run of characters outside the allowlist
    #[error("identifier contains disallowed characters: {offending:?}")]
    InvalidCharacters { offending: String },

    /// The action payload failed validation
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A role grant named a role missing from the configured catalog
    #[error("role {0:?} is not in the role catalog")]
    UnknownRole(String),

    /// The caller's roles do not allow the requested action
    #[error("{caller} is not permitted to perform {action}")]
    NotPermitted { caller: String, action: String },
}

/// Failures raised by an identity store backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the requested identifier
    #[error("no record for identifier {0:?}")]
    NotFound(String),

    /// Reading or writing durable storage failed; retryable at the caller's discretion
    #[error("store I/O failure: {0}")]
    IoFailure(#[source] Arc<std::io::Error>),

    /// A persisted entry could not be decoded
    #[error("corrupt entry at line {line}: {reason}")]
    CorruptEntry { line: usize, reason: String },

    /// The optimistic version check failed; re-read and retry the mutator
    #[error("concurrent modification: expected version {expected:?}, found {found:?}")]
    ConcurrentConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// A mutator tried to change the key of the record it was given
    #[error("mutator changed identifier from {from:?} to {to:?}")]
    IdentifierChanged { from: String, to: String },

    /// The write did not finish before its deadline; the commit may still land
    #[error("store write exceeded its deadline")]
    DeadlineExceeded,
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::IoFailure(Arc::new(error))
    }
}

/// Failures of the store-only operations exposed to the front end.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Rejected(#[from] RejectedError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Low-level failures reported by a [`crate::client::ControlTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(error.to_string()),
            _ => TransportError::Io(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Protocol(error.to_string())
    }
}

/// Reason code carried by `ActionResult::RemoteFailure`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteFailureReason {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// The remote side understood the request and said no
    #[error("remote refused ({code}): {reason}")]
    Refused { code: String, reason: String },

    /// An idempotent call failed on every permitted attempt
    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl From<TransportError> for RemoteFailureReason {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ConnectionRefused(msg) => RemoteFailureReason::ConnectionRefused(msg),
            TransportError::Authentication(msg) => RemoteFailureReason::AuthenticationFailed(msg),
            TransportError::Protocol(msg) => RemoteFailureReason::Protocol(msg),
            TransportError::Io(msg) => RemoteFailureReason::Io(msg),
        }
    }
}
