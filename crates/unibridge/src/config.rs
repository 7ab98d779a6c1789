//! Bridge configuration

use tracing::warn;

/// Largest frame accepted by the stream transports (64MB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Configuration shared by both endpoints of a bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Frame size cap for stream transports (default: 64MB)
    pub max_message_bytes: usize,
    /// Queue depth of the in-memory transport (default: 64)
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            channel_capacity: 64,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by `UNIBRIDGE_MAX_MESSAGE_BYTES` and
    /// `UNIBRIDGE_CHANNEL_CAPACITY`. Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("UNIBRIDGE_MAX_MESSAGE_BYTES") {
            match raw.parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.max_message_bytes = bytes,
                _ => warn!("Ignoring UNIBRIDGE_MAX_MESSAGE_BYTES: {:?}", raw),
            }
        }

        if let Some(raw) = lookup("UNIBRIDGE_CHANNEL_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(depth) if depth > 0 => config.channel_capacity = depth,
                _ => warn!("Ignoring UNIBRIDGE_CHANNEL_CAPACITY: {:?}", raw),
            }
        }

        config
    }
}
