//! Transport abstractions for the bridge
//!
//! The bridge needs exactly two things from the platform layer:
//! - a [`Messenger`] that fires one `(path, content)` pair at the other side
//! - someone that feeds every inbound string to [`Bridge::on_inbound_text`]
//!
//! For byte streams (Unix sockets, TCP, pipes) this module provides both:
//! messages are length-prefixed (4-byte little-endian length + JSON frame),
//! a background writer task owns the write half, and a background reader
//! task plays the listener role.

use crate::bridge::{Bridge, WeakBridge};
use crate::config::BridgeConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use unibridge_core::{BridgeError, Result, WireMessage};

/// Outbound primitive supplied by the platform layer
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver one message to the other side
    async fn send(&self, path: &str, content: &str) -> Result<()>;

    /// Release the underlying channel. Called once when the bridge closes.
    async fn close(&self) {}
}

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read a complete frame from the transport
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Write a complete frame to the transport
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end of stream to the peer
    async fn shutdown(&mut self) -> Result<()>;
}

/// Length-prefixed frame reader over any async byte stream
pub struct FramedReader<R> {
    inner: R,
    max_message_bytes: usize,
}

impl<R> FramedReader<R> {
    pub fn new(inner: R, max_message_bytes: usize) -> Self {
        Self {
            inner,
            max_message_bytes,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for FramedReader<R> {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        // No timeout: dead connections are detected via close/EOF
        let mut len_bytes = [0u8; 4];
        self.inner
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| BridgeError::Transport(format!("Read length failed: {}", e)))?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > self.max_message_bytes {
            return Err(BridgeError::Transport(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        let mut data = vec![0u8; len];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| BridgeError::Transport(format!("Read data failed: {}", e)))?;

        Ok(data)
    }
}

/// Length-prefixed frame writer over any async byte stream
pub struct FramedWriter<W> {
    inner: W,
    max_message_bytes: usize,
}

impl<W> FramedWriter<W> {
    pub fn new(inner: W, max_message_bytes: usize) -> Self {
        Self {
            inner,
            max_message_bytes,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriter for FramedWriter<W> {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_message_bytes {
            return Err(BridgeError::InvalidMessage(format!(
                "Message too large: {} bytes",
                data.len()
            )));
        }

        let len = (data.len() as u32).to_le_bytes();
        self.inner
            .write_all(&len)
            .await
            .map_err(|e| BridgeError::Transport(format!("Write length failed: {}", e)))?;
        self.inner
            .write_all(data)
            .await
            .map_err(|e| BridgeError::Transport(format!("Write data failed: {}", e)))?;
        self.inner
            .flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| BridgeError::Transport(format!("Shutdown failed: {}", e)))
    }
}

/// Messenger writing JSON-encoded [`WireMessage`] frames to a stream.
///
/// Frames are queued to a writer task, so a send abandoned by its caller
/// never leaves a partial frame on the stream.
pub struct StreamMessenger {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    shutdown: CancellationToken,
    max_message_bytes: usize,
}

impl StreamMessenger {
    /// Start the writer task on `runtime` and return the messenger feeding it
    pub fn spawn(
        writer: impl AsyncWriter + 'static,
        config: &BridgeConfig,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let shutdown = CancellationToken::new();
        runtime.spawn(writer_task(Box::new(writer), rx, shutdown.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            shutdown,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

#[async_trait]
impl Messenger for StreamMessenger {
    async fn send(&self, path: &str, content: &str) -> Result<()> {
        let text = WireMessage::new(path, content)?.to_text()?;
        if text.len() > self.max_message_bytes {
            return Err(BridgeError::InvalidMessage(format!(
                "Message too large: {} bytes",
                text.len()
            )));
        }

        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Transport("Not connected".into()))?;
        tx.send(text.into_bytes())
            .await
            .map_err(|_| BridgeError::Transport("Writer task stopped".into()))
    }

    async fn close(&self) {
        self.tx.lock().take();
        self.shutdown.cancel();
    }
}

async fn writer_task(
    mut writer: Box<dyn AsyncWriter>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                // Peer stopped reading; drop the stream mid-frame
                debug!("Stream closed with a frame in flight");
                return;
            }

            result = writer.write_message(&frame) => {
                if let Err(e) = result {
                    error!("Writer task failed: {}", e);
                    return;
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Stream shutdown failed: {}", e);
    }
}

/// Build a bridge over a split byte stream and start its reader and
/// writer tasks.
///
/// # Panics
///
/// Panics when called outside of a tokio runtime.
pub fn attach_stream<R, W>(reader: R, writer: W, config: BridgeConfig) -> Bridge
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let runtime = Handle::current();
    let max = config.max_message_bytes;
    let messenger = StreamMessenger::spawn(FramedWriter::new(writer, max), &config, &runtime);
    let bridge = Bridge::with_runtime(messenger, config, runtime);
    spawn_reader(FramedReader::new(reader, max), &bridge);
    bridge
}

/// Spawn the background task forwarding inbound frames to `bridge`.
///
/// The task exits when the bridge closes or is dropped, and closes the
/// bridge itself when the stream fails or reaches EOF.
pub fn spawn_reader<R: AsyncReader + 'static>(reader: R, bridge: &Bridge) -> JoinHandle<()> {
    bridge
        .runtime()
        .spawn(reader_task(reader, bridge.downgrade(), bridge.lifecycle()))
}

async fn reader_task<R: AsyncReader>(mut reader: R, bridge: WeakBridge, closed: CancellationToken) {
    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!("Bridge closed, reader task exiting");
                break;
            }

            msg_result = reader.read_message() => {
                let Some(bridge) = bridge.upgrade() else {
                    debug!("Bridge dropped, reader task exiting");
                    break;
                };

                match msg_result {
                    Ok(data) => match String::from_utf8(data) {
                        Ok(text) => bridge.on_inbound_text(&text),
                        Err(e) => warn!("Dropping frame that is not UTF-8: {}", e),
                    },
                    Err(e) => {
                        error!("Reader task failed: {}", e);
                        bridge.close(&format!("Connection lost: {}", e));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn test_frame_format() {
        let (client, mut server) = duplex(1024);
        let mut writer = FramedWriter::new(client, 1024);
        assert_ok!(writer.write_message(b"{\"a\":1}").await);

        let mut len = [0u8; 4];
        server.read_exact(&mut len).await.unwrap();
        assert_eq!(u32::from_le_bytes(len), 7);

        let mut body = vec![0u8; 7];
        server.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, mut server) = duplex(1024);
        let mut reader = FramedReader::new(client, 16);
        server.write_all(&1000u32.to_le_bytes()).await.unwrap();

        let err = assert_err!(reader.read_message().await);
        assert!(matches!(err, BridgeError::Transport(_)));

        let (client, _server) = duplex(1024);
        let mut writer = FramedWriter::new(client, 4);
        let err = assert_err!(writer.write_message(b"too long").await);
        assert!(matches!(err, BridgeError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_bridges_over_stream() {
        let (left, right) = duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);

        let engine = attach_stream(left_read, left_write, BridgeConfig::default());
        let host = attach_stream(right_read, right_write, BridgeConfig::default());

        host.register_fn("ping", |ping: Ping| Ok::<_, String>(Ping { seq: ping.seq + 1 }))
            .unwrap();

        let pong: Ping = engine
            .perform("ping", &Ping { seq: 41 }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pong, Ping { seq: 42 });
    }

    #[tokio::test]
    async fn test_eof_closes_bridge_and_fails_pending() {
        let (left, right) = duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let engine = attach_stream(left_read, left_write, BridgeConfig::default());

        let call = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .perform_raw("never", "{}", &CancellationToken::new())
                    .await
            })
        };

        // Let the request go out, then hang up
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(right);

        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("pending call must not hang")
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(engine.is_closed());
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_cancel_or_close() {
        // The peer never reads, so the first large frame wedges the writer
        let (left, _right) = duplex(64);
        let (left_read, left_write) = tokio::io::split(left);
        let config = BridgeConfig {
            channel_capacity: 1,
            ..BridgeConfig::default()
        };
        let engine = attach_stream(left_read, left_write, config);
        let upload = format!("\"{}\"", "x".repeat(1024));

        let mut calls = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            let upload = upload.clone();
            calls.push(tokio::spawn(async move {
                engine
                    .perform_raw("upload", upload, &CancellationToken::new())
                    .await
            }));
        }

        let token = CancellationToken::new();
        let cancelled = {
            let engine = engine.clone();
            let token = token.clone();
            tokio::spawn(async move { engine.perform_raw("upload", upload, &token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), cancelled)
            .await
            .expect("cancel must not wait on the transport")
            .unwrap();
        assert_eq!(result, Err(BridgeError::Cancelled));

        engine.close("peer stopped reading");
        for call in calls {
            let result = tokio::time::timeout(Duration::from_secs(2), call)
                .await
                .expect("close must not wait on the transport")
                .unwrap();
            assert!(matches!(result, Err(BridgeError::Transport(_))));
        }
        assert_eq!(engine.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_before_queueing() {
        let (left, _right) = duplex(1024);
        let (left_read, left_write) = tokio::io::split(left);
        let config = BridgeConfig {
            max_message_bytes: 64,
            ..BridgeConfig::default()
        };
        let engine = attach_stream(left_read, left_write, config);

        let err = assert_err!(engine.publish("/big", "y".repeat(128)).await);
        assert!(matches!(err, BridgeError::InvalidMessage(_)));
        assert!(!engine.is_closed());
    }
}
