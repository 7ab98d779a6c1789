//! Bidirectional workflow bridge between two runtimes
//!
//! This crate provides:
//! - Workflow register and performer (remote calls with typed payloads,
//!   correlation and cancellation)
//! - One-way publish/subscribe notifications
//! - Transport abstractions (Messenger trait, framed reader/writer)
//! - In-memory, TCP and Unix socket transports

pub mod bridge;
pub mod channel;
pub mod config;
mod performer;
pub mod pubsub;
mod register;
mod router;
pub mod tcp;
pub mod transport;
#[cfg(unix)]
pub mod unix;

pub use bridge::{Bridge, WeakBridge};
pub use config::BridgeConfig;
pub use pubsub::Subscription;
pub use transport::{AsyncReader, AsyncWriter, Messenger, attach_stream, spawn_reader};
pub use unibridge_core::{
    BridgeError, CorrelationId, Envelope, JsonCodec, Result, WireMessage,
    WorkflowFailure, error_kinds,
};
