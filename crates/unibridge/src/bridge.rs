//! Bridge endpoint
//!
//! One [`Bridge`] per endpoint. It owns the router, and through it the
//! correlation table, the workflow register and the subscriber table.
//! Cloning is cheap and every clone refers to the same endpoint.

use crate::config::BridgeConfig;
use crate::router::Router;
use crate::transport::Messenger;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use unibridge_core::JsonCodec;

/// One endpoint of a two-sided workflow bridge
#[derive(Clone)]
pub struct Bridge {
    pub(crate) router: Arc<Router>,
}

/// Non-owning reference to a [`Bridge`], held by transport tasks
#[derive(Clone)]
pub struct WeakBridge(Weak<Router>);

impl WeakBridge {
    pub fn upgrade(&self) -> Option<Bridge> {
        self.0.upgrade().map(|router| Bridge { router })
    }
}

impl Bridge {
    /// Create an endpoint sending through `messenger`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime; use
    /// [`Bridge::with_runtime`] to supply a handle explicitly.
    pub fn new(messenger: impl Messenger + 'static, config: BridgeConfig) -> Self {
        Self::with_runtime(messenger, config, Handle::current())
    }

    /// Create an endpoint whose handler tasks run on `runtime`
    pub fn with_runtime(
        messenger: impl Messenger + 'static,
        config: BridgeConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            router: Arc::new(Router::new(Arc::new(messenger), config, runtime)),
        }
    }

    /// Listener entry point: hand over one string received from the other
    /// side.
    ///
    /// Safe to call from any thread. Never fails; malformed input is logged
    /// and dropped.
    pub fn on_inbound_text(&self, raw: &str) {
        self.router.on_inbound_text(raw);
    }

    /// Tear the port down. Pending calls fail with a transport error, running
    /// handlers are asked to stop, later calls fail immediately. Idempotent.
    pub fn close(&self, reason: &str) {
        self.router.close(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.router.is_closed()
    }

    /// Resolves once the bridge has closed
    pub async fn closed(&self) {
        self.router.lifecycle.cancelled().await;
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.router.config
    }

    pub fn codec(&self) -> JsonCodec {
        self.router.codec
    }

    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge(Arc::downgrade(&self.router))
    }

    /// Token cancelled when the bridge closes or is dropped
    pub(crate) fn lifecycle(&self) -> CancellationToken {
        self.router.lifecycle.clone()
    }

    /// Runtime the bridge's background tasks run on
    pub(crate) fn runtime(&self) -> &Handle {
        &self.router.runtime
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::pair;
    use crate::config::BridgeConfig;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;
    use tokio_util::sync::CancellationToken;
    use unibridge_core::{BridgeError, WorkflowFailure};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GreetingRequest {
        name: String,
        number: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GreetingResponse {
        message: String,
        processed: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct DelayedEcho {
        identity: String,
        delay_ms: u64,
    }

    fn register_delayed_echo(bridge: &crate::Bridge) {
        bridge
            .register("delayedEcho", |req: DelayedEcho, _cancel: CancellationToken| async move {
                tokio::time::sleep(Duration::from_millis(req.delay_ms)).await;
                Ok::<_, WorkflowFailure>(req)
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_immediate_greeting() {
        let (unity, ios) = pair(BridgeConfig::default());
        ios.register_fn("immediateGreeting", |req: GreetingRequest| {
            Ok::<_, WorkflowFailure>(GreetingResponse {
                message: format!("Hello {}", req.name),
                processed: req.number + 100,
            })
        })
        .unwrap();

        let response: GreetingResponse = unity
            .perform(
                "immediateGreeting",
                &GreetingRequest {
                    name: "Gertrude".into(),
                    number: 5,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            response,
            GreetingResponse {
                message: "Hello Gertrude".into(),
                processed: 105,
            }
        );
        assert_eq!(unity.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_their_own_results() {
        let (unity, ios) = pair(BridgeConfig::default());
        register_delayed_echo(&ios);

        // Longest first so replies arrive in reverse order
        let calls = [("first", 300), ("second", 100), ("third", 200)].map(|(identity, delay_ms)| {
            let unity = unity.clone();
            tokio::spawn(async move {
                let request = DelayedEcho {
                    identity: identity.to_string(),
                    delay_ms,
                };
                let reply: DelayedEcho = unity
                    .perform("delayedEcho", &request, &CancellationToken::new())
                    .await
                    .unwrap();
                (request, reply)
            })
        });

        for call in calls {
            let (request, reply) = call.await.unwrap();
            assert_eq!(request, reply);
        }
        assert_eq!(unity.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_returns_promptly_and_bridge_keeps_working() {
        let (unity, ios) = pair(BridgeConfig::default());
        register_delayed_echo(&ios);

        let token = CancellationToken::new();
        let call = {
            let unity = unity.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let request = DelayedEcho {
                    identity: "slow".into(),
                    delay_ms: 400,
                };
                unity
                    .perform::<_, DelayedEcho>("delayedEcho", &request, &token)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = Instant::now();
        token.cancel();

        let result = call.await.unwrap();
        assert_eq!(result, Err(BridgeError::Cancelled));
        assert!(cancelled_at.elapsed() < Duration::from_millis(200));
        assert_eq!(unity.pending_calls(), 0);

        // Outlive the handler, whose reply the host suppresses
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(unity.pending_calls(), 0);
        assert!(!unity.is_closed());

        // The bridge keeps working afterwards
        let request = DelayedEcho {
            identity: "after".into(),
            delay_ms: 0,
        };
        let reply: DelayedEcho = assert_ok!(
            unity
                .perform("delayedEcho", &request, &CancellationToken::new())
                .await
        );
        assert_eq!(reply, request);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_sends_nothing() {
        let (unity, ios) = pair(BridgeConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            ios.register_fn("count", move |_: ()| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .unwrap();
        }

        let token = CancellationToken::new();
        token.cancel();
        let result = unity.perform::<_, ()>("count", &(), &token).await;
        assert_eq!(result, Err(BridgeError::Cancelled));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_is_remote_error() {
        let (unity, ios) = pair(BridgeConfig::default());
        ios.register_fn("fails", |_: GreetingRequest| -> Result<GreetingResponse, anyhow::Error> {
            Err(anyhow::anyhow!("native side refused"))
        })
        .unwrap();

        let err = unity
            .perform::<_, GreetingResponse>(
                "fails",
                &GreetingRequest {
                    name: "x".into(),
                    number: 0,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_remote(), "unexpected error: {:?}", err);
        match err {
            BridgeError::RemoteWorkflow { message, .. } => {
                assert_eq!(message, "native side refused")
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_without_hanging() {
        let (unity, _ios) = pair(BridgeConfig::default());
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            unity.perform_raw("nobodyHome", "{}", &CancellationToken::new()),
        )
        .await
        .expect("call must resolve");

        match result {
            Err(BridgeError::RemoteWorkflow { kind, .. }) => assert_eq!(kind, "WorkflowNotFound"),
            other => panic!("Expected WorkflowNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let (unity, ios) = pair(BridgeConfig::default());
        assert_ok!(unity.publish("/test/start", "{}").await);
        assert_eq!(ios.subscriber_count("/test/start"), 0);
    }

    #[tokio::test]
    async fn test_two_subscriptions_each_notified_once() {
        let (unity, ios) = pair(BridgeConfig::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let _a = ios.subscribe("/test/start", {
            let first = first.clone();
            move |_: &str| {
                first.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _b = ios.subscribe("/test/start", {
            let second = second.clone();
            move |_: &str| {
                second.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Delivery is in arrival order, so once the marker lands the
        // earlier notification has been fully dispatched
        let (marker_tx, mut marker_rx) = mpsc::unbounded_channel();
        let _marker = ios.subscribe("/test/marker", move |_: &str| {
            let _ = marker_tx.send(());
        });

        unity.publish("/test/start", "{}").await.unwrap();
        unity.publish("/test/marker", "{}").await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), marker_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_subscription_stops_receiving() {
        let (unity, ios) = pair(BridgeConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = ios.subscribe_value("/score", move |score: u32| {
            let _ = tx.send(score);
        });

        unity.publish_value("/score", &1u32).await.unwrap();
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap(),
            Some(1)
        );

        sub.dispose();
        sub.dispose();
        unity.publish_value("/score", &2u32).await.unwrap();

        // Disposal dropped the listener and its sender, so nothing else arrives
        drop(sub);
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_later_calls() {
        let (unity, ios) = pair(BridgeConfig::default());
        register_delayed_echo(&ios);

        let call = {
            let unity = unity.clone();
            tokio::spawn(async move {
                let request = DelayedEcho {
                    identity: "stuck".into(),
                    delay_ms: 5_000,
                };
                unity
                    .perform::<_, DelayedEcho>("delayedEcho", &request, &CancellationToken::new())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        unity.close("app backgrounded");
        unity.close("second close is a no-op");

        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("pending call must fail on close")
            .unwrap();
        assert_eq!(
            result,
            Err(BridgeError::Transport("app backgrounded".into()))
        );

        let later = unity.perform_raw("delayedEcho", "{}", &CancellationToken::new()).await;
        assert!(matches!(later, Err(BridgeError::Transport(_))));
        assert!(matches!(
            unity.publish("/test/start", "{}").await,
            Err(BridgeError::Transport(_))
        ));

        tokio::time::timeout(Duration::from_secs(2), ios.closed())
            .await
            .expect("peer should observe the close");
    }

    #[tokio::test]
    async fn test_both_sides_can_call_each_other() {
        let (unity, ios) = pair(BridgeConfig::default());
        unity
            .register_fn("engineVersion", |_: ()| Ok::<_, String>("2022.3".to_string()))
            .unwrap();
        ios.register_fn("osVersion", |_: ()| Ok::<_, String>("17.4".to_string()))
            .unwrap();

        let token = CancellationToken::new();
        let (engine, os) = tokio::join!(
            ios.perform::<_, String>("engineVersion", &(), &token),
            unity.perform::<_, String>("osVersion", &(), &token),
        );
        assert_eq!(engine.unwrap(), "2022.3");
        assert_eq!(os.unwrap(), "17.4");
    }
}
