//! Payload codec
//!
//! Payloads cross the boundary as JSON text. Wire field names belong to the
//! payload types: declare them with `#[serde(rename_all = "camelCase")]` so
//! both runtimes agree on the same keys. The codec never rewrites keys, so
//! map keys and untyped `serde_json::Value` payloads pass through verbatim.

use crate::error::{BridgeError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON payload codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode a value to wire text
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_json::to_string(value)
            .map_err(|e| BridgeError::PayloadDecode(format!("encode failed: {}", e)))
    }

    /// Decode wire text into a value
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(Into::into)
    }
}
