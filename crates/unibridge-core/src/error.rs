//! Error types for the bridge

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Port unavailable or closed; fatal to every pending call on the bridge
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded or decoded
    #[error("Payload decode error: {0}")]
    PayloadDecode(String),

    /// A workflow is already bound under this path
    #[error("Workflow already registered: {0}")]
    DuplicateBinding(String),

    /// The call reached the remote handler and the handler failed
    #[error("Remote workflow failed ({kind}): {message}")]
    RemoteWorkflow { kind: String, message: String },

    /// Local cancellation fired before a response arrived
    #[error("Workflow call cancelled")]
    Cancelled,

    /// Message violates an envelope invariant (e.g. empty path)
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl BridgeError {
    /// True when the call reached a remote handler which then failed.
    ///
    /// Lets callers branch on "the handler ran and failed" versus
    /// "the call never completed".
    pub fn is_remote(&self) -> bool {
        matches!(self, BridgeError::RemoteWorkflow { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::PayloadDecode(err.to_string())
    }
}

/// Failure produced by a workflow handler.
///
/// Converted into an error envelope on the responding side and surfaced to
/// the caller as [`BridgeError::RemoteWorkflow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFailure {
    pub kind: String,
    pub message: String,
}

impl WorkflowFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Generic handler failure with the default `WorkflowFailed` kind
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_kinds::WORKFLOW_FAILED, message)
    }
}

impl std::fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<anyhow::Error> for WorkflowFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{:#}", err))
    }
}

impl From<String> for WorkflowFailure {
    fn from(message: String) -> Self {
        Self::failed(message)
    }
}

impl From<&str> for WorkflowFailure {
    fn from(message: &str) -> Self {
        Self::failed(message)
    }
}

impl From<BridgeError> for WorkflowFailure {
    fn from(err: BridgeError) -> Self {
        match err {
            // Nested remote failures keep their original kind
            BridgeError::RemoteWorkflow { kind, message } => Self::new(kind, message),
            BridgeError::PayloadDecode(message) => Self::new(error_kinds::PAYLOAD_DECODE, message),
            other => Self::failed(other.to_string()),
        }
    }
}

/// Error kinds carried in error envelopes
pub mod error_kinds {
    pub const PAYLOAD_DECODE: &str = "PayloadDecode";
    pub const RESULT_ENCODE: &str = "ResultEncode";
    pub const WORKFLOW_FAILED: &str = "WorkflowFailed";
    pub const WORKFLOW_NOT_FOUND: &str = "WorkflowNotFound";
    pub const WORKFLOW_PANICKED: &str = "WorkflowPanicked";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_is_distinguished() {
        let remote = BridgeError::RemoteWorkflow {
            kind: "WorkflowFailed".into(),
            message: "boom".into(),
        };
        assert!(remote.is_remote());
        assert!(!BridgeError::Transport("closed".into()).is_remote());
        assert!(!BridgeError::Cancelled.is_remote());
    }

    #[test]
    fn test_failure_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("saving game");
        let failure = WorkflowFailure::from(err);
        assert_eq!(failure.kind, error_kinds::WORKFLOW_FAILED);
        assert_eq!(failure.message, "saving game: disk full");
    }

    #[test]
    fn test_failure_from_decode_error() {
        let failure = WorkflowFailure::from(BridgeError::PayloadDecode("bad".into()));
        assert_eq!(failure.kind, error_kinds::PAYLOAD_DECODE);
        assert_eq!(failure.message, "bad");
    }
}
