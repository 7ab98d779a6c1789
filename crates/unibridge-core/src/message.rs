//! Wire messages exchanged between the two endpoints
//!
//! Every frame is a [`WireMessage`] serialized as JSON:
//! `{"path": "...", "content": "..."}`.
//!
//! `content` carries an [`Envelope`], itself JSON with an internal `kind` tag:
//! `{"kind": "request", "id": 7, "payload": "{...}"}`.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Correlation key tying a request to its response.
///
/// Ids are allocated by the endpoint that sends the request and are only
/// unique per originator; the envelope kind tells the receiver whose id it is.
pub type CorrelationId = u64;

/// Minimal envelope carried across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    path: String,
    content: String,
}

impl WireMessage {
    /// Build a message, rejecting an empty path
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(BridgeError::InvalidMessage("path must not be empty".into()));
        }
        Ok(Self {
            path,
            content: content.into(),
        })
    }

    /// Build a message carrying an encoded envelope
    pub fn with_envelope(path: impl Into<String>, envelope: &Envelope) -> Result<Self> {
        Self::new(path, envelope.encode()?)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Serialize to the text handed to the messenger
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Parse text received from the other side
    pub fn from_text(text: &str) -> Result<Self> {
        let msg: WireMessage = serde_json::from_str(text)?;
        if msg.path.is_empty() {
            return Err(BridgeError::InvalidMessage("path must not be empty".into()));
        }
        Ok(msg)
    }

    /// Decode the envelope carried in `content`
    pub fn envelope(&self) -> Result<Envelope> {
        Envelope::decode(&self.content)
    }
}

/// Error details carried by an error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Distinguishes requests, responses, errors, cancellations and publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Envelope {
    /// Invoke the workflow bound at the message path
    Request { id: CorrelationId, payload: String },

    /// Successful result of a request
    Response { id: CorrelationId, payload: String },

    /// Failed result of a request
    Error { id: CorrelationId, error: ErrorBody },

    /// The caller gave up on a request (best effort)
    Cancel { id: CorrelationId },

    /// One-way notification
    Publish { payload: String },
}

impl Envelope {
    pub fn error(id: CorrelationId, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Envelope::Error {
            id,
            error: ErrorBody {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Into::into)
    }

    /// Short label used in logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Envelope::Request { .. } => "request",
            Envelope::Response { .. } => "response",
            Envelope::Error { .. } => "error",
            Envelope::Cancel { .. } => "cancel",
            Envelope::Publish { .. } => "publish",
        }
    }
}
