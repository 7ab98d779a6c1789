//! TCP transport
//!
//! Used when the other runtime exposes a TCP port (e.g. an engine running in
//! a separate process or on a device reachable over the network).

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::transport::attach_stream;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;
use unibridge_core::{BridgeError, Result};

/// Connect to `addr` and build a bridge over the connection
pub async fn connect<A: ToSocketAddrs + std::fmt::Debug>(
    addr: A,
    config: BridgeConfig,
) -> Result<Bridge> {
    info!("Connecting to peer at {:?}", addr);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| BridgeError::Transport(format!("Failed to connect to {:?}: {}", addr, e)))?;
    attach(stream, config)
}

/// Build a bridge over an established TCP connection
pub fn attach(stream: TcpStream, config: BridgeConfig) -> Result<Bridge> {
    // Disable Nagle's algorithm for low latency
    stream
        .set_nodelay(true)
        .map_err(|e| BridgeError::Transport(format!("Failed to set TCP_NODELAY: {}", e)))?;

    let (read_half, write_half) = stream.into_split();
    Ok(attach_stream(read_half, write_half, config))
}
