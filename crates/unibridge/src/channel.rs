//! In-process transport
//!
//! Connects two bridges living in the same process through bounded queues.
//! Each side gets a pump task that feeds the peer's outbound text into its
//! own `on_inbound_text`, mirroring what the native trampoline does when the
//! two runtimes are linked into one app.

use crate::bridge::{Bridge, WeakBridge};
use crate::config::BridgeConfig;
use crate::transport::Messenger;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use unibridge_core::{BridgeError, Result, WireMessage};

/// Messenger pushing encoded messages into an in-memory queue
pub struct ChannelMessenger {
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelMessenger {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

#[async_trait]
impl Messenger for ChannelMessenger {
    async fn send(&self, path: &str, content: &str) -> Result<()> {
        let text = WireMessage::new(path, content)?.to_text()?;
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Transport("Channel closed".into()))?;
        tx.send(text)
            .await
            .map_err(|_| BridgeError::Transport("Peer disconnected".into()))
    }

    async fn close(&self) {
        // Dropping the sender lets the peer's pump observe disconnection
        self.tx.lock().take();
    }
}

/// Build two bridges wired to each other in-process
pub fn pair(config: BridgeConfig) -> (Bridge, Bridge) {
    let capacity = config.channel_capacity.max(1);
    let (left_tx, left_rx) = mpsc::channel(capacity);
    let (right_tx, right_rx) = mpsc::channel(capacity);

    let left = Bridge::new(ChannelMessenger::new(left_tx), config.clone());
    let right = Bridge::new(ChannelMessenger::new(right_tx), config);

    right
        .runtime()
        .spawn(pump(left_rx, right.downgrade(), right.lifecycle()));
    left.runtime()
        .spawn(pump(right_rx, left.downgrade(), left.lifecycle()));

    (left, right)
}

async fn pump(mut rx: mpsc::Receiver<String>, bridge: WeakBridge, closed: CancellationToken) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!("Bridge closed, pump exiting");
                break;
            }

            text = rx.recv() => {
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                match text {
                    Some(text) => bridge.on_inbound_text(&text),
                    None => {
                        bridge.close("Peer disconnected");
                        break;
                    }
                }
            }
        }
    }
}
