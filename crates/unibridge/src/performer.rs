//! Workflow performer
//!
//! Invokes workflows registered on the other side and awaits their outcome.
//! Each outstanding call owns one entry in the correlation table; the entry
//! is removed on resolution, cancellation, drop of the waiting future, or
//! teardown of the port.

use crate::bridge::Bridge;
use crate::router::Router;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use unibridge_core::{BridgeError, CorrelationId, Envelope, Result, WireMessage};

/// Single-resolution slot for the outcome of one call
type ResultSlot = oneshot::Sender<Result<String>>;

struct PendingCall {
    path: String,
    slot: ResultSlot,
}

#[derive(Default)]
struct TableState {
    calls: HashMap<CorrelationId, PendingCall>,
    /// Set once the port closes; no call may be opened afterwards
    closed: Option<String>,
}

/// Correlation id → pending call.
///
/// Touched from the perform path (open, cancel) and the dispatch path
/// (resolve), so every access goes through the mutex.
pub(crate) struct CorrelationTable {
    state: Mutex<TableState>,
    next_id: AtomicU64,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh id and register its pending call
    fn open(&self, path: &str) -> Result<(CorrelationId, oneshot::Receiver<Result<String>>)> {
        let (slot, waiter) = oneshot::channel();
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(BridgeError::Transport(reason.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.calls.insert(
            id,
            PendingCall {
                path: path.to_string(),
                slot,
            },
        );
        Ok((id, waiter))
    }

    /// Resolve and remove a pending call. Returns false for unknown ids.
    pub(crate) fn resolve(&self, id: CorrelationId, outcome: Result<String>) -> bool {
        let Some(call) = self.state.lock().calls.remove(&id) else {
            return false;
        };
        debug!("Resolved call {} on {}", id, call.path);
        // The waiter may already be gone (future dropped); nothing to do then
        let _ = call.slot.send(outcome);
        true
    }

    /// Forget a pending call without resolving it
    fn remove(&self, id: CorrelationId) -> bool {
        self.state.lock().calls.remove(&id).is_some()
    }

    /// Mark the table closed and hand back every pending slot.
    /// Returns `None` if it was already closed.
    pub(crate) fn close(&self, reason: &str) -> Option<Vec<ResultSlot>> {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return None;
        }
        state.closed = Some(reason.to_string());
        Some(state.calls.drain().map(|(_, call)| call.slot).collect())
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.state.lock().closed.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().calls.len()
    }
}

/// Removes the pending entry however the waiting future ends
struct PendingGuard<'a> {
    calls: &'a CorrelationTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.remove(self.id);
    }
}

impl Router {
    pub(crate) async fn perform(
        self: &Arc<Self>,
        path: &str,
        payload: String,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        // Register before sending so the reply can never beat the entry
        let (id, waiter) = self.calls.open(path)?;
        let _guard = PendingGuard {
            calls: &self.calls,
            id,
        };

        let request = WireMessage::with_envelope(path, &Envelope::Request { id, payload })?;

        // A stalled transport must not hold the call past cancel or close.
        // Dropping the send before it completes means nothing was queued.
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Call {} on {} cancelled before it was sent", id, path);
                return Err(BridgeError::Cancelled);
            }

            _ = self.lifecycle.cancelled() => return Err(self.closed_error()),

            sent = self.send(request) => sent?,
        }

        tokio::select! {
            biased;

            outcome = waiter => outcome.unwrap_or_else(|_| {
                Err(BridgeError::Transport("Pending call dropped".into()))
            }),

            _ = cancel.cancelled() => {
                if self.calls.remove(id) {
                    debug!("Call {} on {} cancelled, notifying peer", id, path);
                    self.spawn_send(path, Envelope::Cancel { id });
                }
                Err(BridgeError::Cancelled)
            }
        }
    }
}

impl Bridge {
    /// Invoke the remote workflow at `path` and await its typed result.
    ///
    /// Fails with [`BridgeError::Cancelled`] as soon as `cancel` fires,
    /// [`BridgeError::RemoteWorkflow`] when the remote handler fails, and
    /// [`BridgeError::Transport`] when the port is or becomes closed.
    pub async fn perform<P, R>(&self, path: &str, payload: &P, cancel: &CancellationToken) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let codec = self.router.codec;
        let content = codec.encode(payload)?;
        let reply = self.router.perform(path, content, cancel).await?;
        codec.decode(&reply)
    }

    /// Untyped form of [`Bridge::perform`]: content goes out verbatim and the
    /// reply comes back as encoded text.
    pub async fn perform_raw(
        &self,
        path: &str,
        content: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.router.perform(path, content.into(), cancel).await
    }

    /// Number of calls still awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.router.calls.len()
    }
}
