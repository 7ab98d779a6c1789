//! Workflow register
//!
//! Holds the workflows this endpoint exposes and runs them when the other
//! side invokes them. Bindings are type-erased: the payload and result codecs
//! are captured at registration time and the stored handler only ever sees
//! encoded text.

use crate::bridge::Bridge;
use crate::router::Router;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unibridge_core::{
    BridgeError, CorrelationId, Envelope, JsonCodec, Result, WorkflowFailure, error_kinds,
};

type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<String, WorkflowFailure>> + Send>>;

/// Encoded payload in, encoded result (or failure) out
type ErasedHandler = Arc<dyn Fn(String, CancellationToken) -> HandlerFuture + Send + Sync>;

struct ProcedureBinding {
    handler: ErasedHandler,
    result_type: &'static str,
}

pub(crate) struct WorkflowRegister {
    bindings: RwLock<HashMap<String, Arc<ProcedureBinding>>>,
    /// Inbound requests currently executing, keyed by the caller's id
    running: Mutex<HashMap<CorrelationId, CancellationToken>>,
}

impl WorkflowRegister {
    pub(crate) fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `handler` under `path`. Duplicate paths are rejected.
    fn bind(&self, path: &str, binding: ProcedureBinding) -> Result<()> {
        if path.is_empty() {
            return Err(BridgeError::InvalidMessage(
                "workflow path must not be empty".into(),
            ));
        }

        let mut bindings = self.bindings.write();
        if bindings.contains_key(path) {
            return Err(BridgeError::DuplicateBinding(path.to_string()));
        }
        info!("Registered workflow {} -> {}", path, binding.result_type);
        bindings.insert(path.to_string(), Arc::new(binding));
        Ok(())
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.bindings.read().contains_key(path)
    }

    /// Run the workflow bound at `path` for request `id`.
    /// Returns false when nothing is bound there.
    pub(crate) fn dispatch(
        &self,
        router: &Arc<Router>,
        path: &str,
        id: CorrelationId,
        payload: String,
    ) -> bool {
        let Some(binding) = self.bindings.read().get(path).cloned() else {
            return false;
        };

        let cancel = router.lifecycle.child_token();
        if self.running.lock().insert(id, cancel.clone()).is_some() {
            warn!("Request id {} reused while still running", id);
        }

        let router = Arc::clone(router);
        let path = path.to_string();
        router.runtime.clone().spawn(async move {
            // Run the handler in its own task so a panic becomes an error reply
            let task = router
                .runtime
                .spawn((binding.handler)(payload, cancel.clone()));
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(WorkflowFailure::new(
                    error_kinds::WORKFLOW_PANICKED,
                    panic_message(e.into_panic()),
                )),
                Err(e) => Err(WorkflowFailure::failed(e.to_string())),
            };
            router.register.running.lock().remove(&id);

            if cancel.is_cancelled() {
                debug!("Request {} on {} was cancelled, suppressing reply", id, path);
                return;
            }

            let envelope = match outcome {
                Ok(payload) => Envelope::Response { id, payload },
                Err(failure) => {
                    debug!("Workflow {} failed: {}", path, failure);
                    Envelope::error(id, failure.kind, failure.message)
                }
            };
            if let Err(e) = router.send_envelope(&path, &envelope).await {
                warn!("Failed to reply to request {} on {}: {}", id, path, e);
            }
        });
        true
    }

    /// Best-effort stop of a running request the peer gave up on
    pub(crate) fn cancel(&self, id: CorrelationId) {
        match self.running.lock().get(&id) {
            Some(token) => {
                debug!("Peer cancelled request {}", id);
                token.cancel();
            }
            None => debug!("Cancel for request {} that is not running", id),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "workflow panicked".to_string()
    }
}

impl Bridge {
    /// Expose an asynchronous workflow under `path`.
    ///
    /// The handler receives the decoded payload and a token that fires when
    /// the caller cancels or the bridge closes. Registration is expected at
    /// startup; a second registration on the same path fails with
    /// [`BridgeError::DuplicateBinding`] and should be treated as fatal.
    pub fn register<P, R, E, F, Fut>(&self, path: &str, handler: F) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<WorkflowFailure> + Send + 'static,
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let codec: JsonCodec = self.router.codec;
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(
            move |content: String, cancel: CancellationToken| -> HandlerFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let payload: P = codec.decode(&content).map_err(|e| {
                        WorkflowFailure::new(error_kinds::PAYLOAD_DECODE, e.to_string())
                    })?;
                    let result = (*handler)(payload, cancel)
                        .await
                        .map_err(Into::<WorkflowFailure>::into)?;
                    codec.encode(&result).map_err(|e| {
                        WorkflowFailure::new(error_kinds::RESULT_ENCODE, e.to_string())
                    })
                })
            },
        );

        self.router.register.bind(
            path,
            ProcedureBinding {
                handler: erased,
                result_type: std::any::type_name::<R>(),
            },
        )
    }

    /// Expose a workflow that completes synchronously
    pub fn register_fn<P, R, E, F>(&self, path: &str, handler: F) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<WorkflowFailure> + Send + 'static,
        F: Fn(P) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.register(path, move |payload: P, _cancel: CancellationToken| {
            std::future::ready(handler(payload))
        })
    }

    /// Whether a workflow is bound under `path`
    pub fn is_registered(&self, path: &str) -> bool {
        self.router.register.contains(path)
    }
}
