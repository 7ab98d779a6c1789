//! Bridge router
//!
//! Single owner of the messenger and single entry point for inbound text.
//! Inbound messages are dispatched by envelope kind:
//! - `response` / `error` resolve a pending call in the correlation table
//! - `request` / `cancel` go to the workflow register
//! - `publish` is offered to the subscribers of the message path

use crate::config::BridgeConfig;
use crate::performer::CorrelationTable;
use crate::pubsub::SubscriberTable;
use crate::register::WorkflowRegister;
use crate::transport::Messenger;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unibridge_core::{
    BridgeError, CorrelationId, Envelope, JsonCodec, Result, WireMessage, error_kinds,
};

/// Characters of message content included in debug logs
const PREVIEW_CHARS: usize = 200;

pub(crate) struct Router {
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) codec: JsonCodec,
    pub(crate) config: BridgeConfig,
    /// Runtime used to spawn handler tasks when inbound text arrives on a
    /// thread outside of it
    pub(crate) runtime: Handle,
    pub(crate) calls: CorrelationTable,
    pub(crate) register: WorkflowRegister,
    pub(crate) subscribers: Arc<SubscriberTable>,
    /// Cancelled exactly once, when the port closes
    pub(crate) lifecycle: CancellationToken,
}

pub(crate) fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

impl Router {
    pub(crate) fn new(messenger: Arc<dyn Messenger>, config: BridgeConfig, runtime: Handle) -> Self {
        Self {
            messenger,
            codec: JsonCodec::new(),
            config,
            runtime,
            calls: CorrelationTable::new(),
            register: WorkflowRegister::new(),
            subscribers: Arc::new(SubscriberTable::new()),
            lifecycle: CancellationToken::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    pub(crate) fn closed_error(&self) -> BridgeError {
        let reason = self
            .calls
            .closed_reason()
            .unwrap_or_else(|| "Bridge closed".into());
        BridgeError::Transport(reason)
    }

    /// Forward one message to the messenger
    pub(crate) async fn send(&self, message: WireMessage) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        debug!(
            "[out] path={} len={} content={}",
            message.path(),
            message.content().len(),
            preview(message.content())
        );
        self.messenger
            .send(message.path(), message.content())
            .await
    }

    pub(crate) async fn send_envelope(&self, path: &str, envelope: &Envelope) -> Result<()> {
        self.send(WireMessage::with_envelope(path, envelope)?).await
    }

    /// Send an envelope from a detached task, logging any failure
    pub(crate) fn spawn_send(self: &Arc<Self>, path: &str, envelope: Envelope) {
        let router = Arc::clone(self);
        let path = path.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = router.send_envelope(&path, &envelope).await {
                warn!("Failed to send {} on {}: {}", envelope.kind_name(), path, e);
            }
        });
    }

    /// Decode and dispatch one inbound message.
    ///
    /// Never fails: malformed input from the foreign runtime is logged and
    /// dropped so that subsequent messages keep flowing.
    pub(crate) fn on_inbound_text(self: &Arc<Self>, raw: &str) {
        if self.is_closed() {
            debug!("Bridge closed, dropping inbound message");
            return;
        }

        let message = match WireMessage::from_text(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed message ({}): {}", e, preview(raw));
                return;
            }
        };

        let envelope = match message.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "Dropping message on {} with malformed envelope ({}): {}",
                    message.path(),
                    e,
                    preview(message.content())
                );
                return;
            }
        };

        debug!(
            "[in] path={} kind={} content={}",
            message.path(),
            envelope.kind_name(),
            preview(message.content())
        );

        match envelope {
            Envelope::Response { id, payload } => self.resolve(message.path(), id, Ok(payload)),
            Envelope::Error { id, error } => self.resolve(
                message.path(),
                id,
                Err(BridgeError::RemoteWorkflow {
                    kind: error.kind,
                    message: error.message,
                }),
            ),
            Envelope::Request { id, payload } => self.invoke(message.path(), id, payload),
            Envelope::Cancel { id } => self.register.cancel(id),
            Envelope::Publish { payload } => {
                let delivered = self.subscribers.deliver(message.path(), &payload);
                debug!("Delivered {} to {} subscriber(s)", message.path(), delivered);
            }
        }
    }

    fn resolve(&self, path: &str, id: CorrelationId, outcome: Result<String>) {
        if !self.calls.resolve(id, outcome) {
            // Benign: the caller cancelled or the bridge was torn down
            warn!("Dropping reply for unknown or resolved call {} on {}", id, path);
        }
    }

    fn invoke(self: &Arc<Self>, path: &str, id: CorrelationId, payload: String) {
        if !self.register.dispatch(self, path, id, payload) {
            warn!("No workflow registered for {}", path);
            self.spawn_send(
                path,
                Envelope::error(
                    id,
                    error_kinds::WORKFLOW_NOT_FOUND,
                    format!("No workflow registered for {}", path),
                ),
            );
        }
    }

    /// Tear down the port. Idempotent.
    ///
    /// Fails every pending call with a transport error, signals running
    /// handlers to stop and releases the messenger.
    pub(crate) fn close(&self, reason: &str) {
        let Some(pending) = self.calls.close(reason) else {
            return;
        };

        info!(
            "Bridge closed ({}), failing {} pending call(s)",
            reason,
            pending.len()
        );
        self.lifecycle.cancel();

        for slot in pending {
            let _ = slot.send(Err(BridgeError::Transport(reason.to_string())));
        }

        let messenger = Arc::clone(&self.messenger);
        self.runtime.spawn(async move {
            messenger.close().await;
        });
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        // Stops pump and reader tasks still holding the lifecycle token
        self.lifecycle.cancel();
    }
}
