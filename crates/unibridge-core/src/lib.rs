//! # unibridge-core
//!
//! Core types for the unibridge workflow bridge.
//!
//! This crate provides the foundational types shared by both endpoints:
//! - Wire message and envelope formats
//! - JSON payload codec
//! - Error types and wire error kinds

pub mod codec;
pub mod error;
pub mod message;

pub use codec::JsonCodec;
pub use error::{BridgeError, Result, WorkflowFailure, error_kinds};
pub use message::{CorrelationId, Envelope, ErrorBody, WireMessage};
