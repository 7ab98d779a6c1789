//! Unix socket transport
//!
//! Used when the native host and the engine runtime share a machine and talk
//! over a Unix domain socket.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::transport::attach_stream;
use std::path::Path;
use tokio::net::UnixStream;
use tracing::info;
use unibridge_core::{BridgeError, Result};

/// Connect to the socket at `path` and build a bridge over it
pub async fn connect(path: impl AsRef<Path>, config: BridgeConfig) -> Result<Bridge> {
    let path = path.as_ref();
    info!("Connecting to peer at {}", path.display());
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| BridgeError::Transport(format!("Failed to connect: {}", e)))?;
    Ok(attach(stream, config))
}

/// Build a bridge over an established Unix stream
pub fn attach(stream: UnixStream, config: BridgeConfig) -> Bridge {
    let (read_half, write_half) = stream.into_split();
    attach_stream(read_half, write_half, config)
}
