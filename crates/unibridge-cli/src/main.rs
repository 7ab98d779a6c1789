//! unibridge demo
//!
//! Runs both endpoints of a bridge in one process: an "engine" side (the
//! game runtime) and a "host" side (the native app). They talk over an
//! in-memory pair, or over a Unix socket when a socket path is given:
//!
//! ```text
//! unibridge-demo                      # in-memory
//! unibridge-demo /tmp/unibridge.sock  # Unix socket
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unibridge::{Bridge, BridgeConfig, BridgeError, WorkflowFailure, channel};

/// How long the engine waits before giving up on the slow greeting
const CANCEL_AFTER: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GreetingRequest {
    name: String,
    number: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GreetingResponse {
    message: String,
    processed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayedGreetingRequest {
    name: String,
    delay_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartNotification {
    scene_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::from_env();
    let socket_path = std::env::args().nth(1);

    info!("unibridge demo starting");
    let (engine, host) = match socket_path {
        Some(path) => connect_unix(&path, config).await?,
        None => {
            info!("Using in-memory transport");
            channel::pair(config)
        }
    };

    register_host_workflows(&host)?;
    let _start = host.subscribe_value("/test/start", |start: StartNotification| {
        info!("[host] /test/start received for scene {}", start.scene_name);
    });

    run_engine_calls(&engine).await;

    engine.close("demo finished");
    host.closed().await;
    info!("unibridge demo shutting down");
    Ok(())
}

#[cfg(unix)]
async fn connect_unix(path: &str, config: BridgeConfig) -> Result<(Bridge, Bridge)> {
    use tokio::net::UnixListener;

    info!("Socket path: {}", path);
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).with_context(|| format!("binding {}", path))?;

    let accept = tokio::spawn(async move { listener.accept().await });
    let engine = unibridge::unix::connect(path, config.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to host: {}", e))?;
    let (stream, _) = accept.await?.context("accepting engine connection")?;
    let host = unibridge::unix::attach(stream, config);

    Ok((engine, host))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &str, _config: BridgeConfig) -> Result<(Bridge, Bridge)> {
    anyhow::bail!("Unix sockets are not available on this platform")
}

fn register_host_workflows(host: &Bridge) -> Result<()> {
    host.register_fn("immediateGreeting", |req: GreetingRequest| {
        Ok::<_, WorkflowFailure>(GreetingResponse {
            message: format!("Hello {}", req.name),
            processed: req.number + 100,
        })
    })?;

    host.register(
        "delayedGreeting",
        |req: DelayedGreetingRequest, cancel: CancellationToken| async move {
            tokio::select! {
                _ = sleep(Duration::from_secs(req.delay_seconds)) => {
                    Ok(format!("Hello {}, sorry for the wait", req.name))
                }
                _ = cancel.cancelled() => {
                    info!("[host] delayedGreeting for {} abandoned by caller", req.name);
                    Err(WorkflowFailure::new("Cancelled", "caller gave up"))
                }
            }
        },
    )?;

    host.register_fn("failingWorkflow", |_: serde_json::Value| -> Result<(), anyhow::Error> {
        anyhow::bail!("this workflow always fails")
    })?;

    Ok(())
}

async fn run_engine_calls(engine: &Bridge) {
    let no_cancel = CancellationToken::new();

    match engine
        .perform::<_, GreetingResponse>(
            "immediateGreeting",
            &GreetingRequest {
                name: "Gertrude".into(),
                number: 5,
            },
            &no_cancel,
        )
        .await
    {
        Ok(response) => info!(
            "[engine] immediateGreeting -> {:?} / {}",
            response.message, response.processed
        ),
        Err(e) => warn!("[engine] immediateGreeting failed: {}", e),
    }

    // Give up on a slow workflow after a fixed delay
    let deadline = CancellationToken::new();
    tokio::spawn({
        let deadline = deadline.clone();
        async move {
            sleep(CANCEL_AFTER).await;
            deadline.cancel();
        }
    });
    match engine
        .perform::<_, String>(
            "delayedGreeting",
            &DelayedGreetingRequest {
                name: "Gertrude".into(),
                delay_seconds: 5,
            },
            &deadline,
        )
        .await
    {
        Ok(message) => info!("[engine] delayedGreeting -> {}", message),
        Err(BridgeError::Cancelled) => info!(
            "[engine] delayedGreeting cancelled after {:?}",
            CANCEL_AFTER
        ),
        Err(e) => warn!("[engine] delayedGreeting failed: {}", e),
    }

    match engine
        .perform::<_, ()>("failingWorkflow", &serde_json::json!({}), &no_cancel)
        .await
    {
        Err(BridgeError::RemoteWorkflow { kind, message }) => {
            info!("[engine] failingWorkflow failed remotely ({}): {}", kind, message)
        }
        other => warn!("[engine] failingWorkflow unexpected outcome: {:?}", other),
    }

    if let Err(e) = engine
        .publish_value(
            "/test/start",
            &StartNotification {
                scene_name: "MainMenu".into(),
            },
        )
        .await
    {
        warn!("[engine] publish failed: {}", e);
    }

    // Let the notification land before shutting down
    sleep(Duration::from_millis(100)).await;
}
