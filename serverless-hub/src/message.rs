use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminates every frame of the JSON hub protocol.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Keep-alive frame the client sends, separator included.
pub const PING_RECORD: &str = "{\"type\":6}\u{1e}";

/// Event name the server publishes and the client listens for.
pub const SEND_MESSAGE_TARGET: &str = "SendMessage";

/// Body of the REST send calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PayloadMessage {
    pub target: String,
    pub arguments: Vec<Value>,
}

impl PayloadMessage {
    pub fn hello_from(server_name: &str) -> Self {
        Self {
            target: SEND_MESSAGE_TARGET.to_string(),
            arguments: vec![
                Value::String(server_name.to_string()),
                Value::String("Hello from server".to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: "json".to_string(),
            version: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Frames of the JSON hub protocol this crate understands.
///
/// Only invocations, pings and close frames matter to a listening client;
/// everything else decodes as [`HubFrame::Other`] and is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String> },
    Other(u8),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<String>,
}

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

impl HubFrame {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match raw.kind {
            INVOCATION => HubFrame::Invocation {
                target: raw.target.unwrap_or_default(),
                arguments: raw.arguments.unwrap_or_default(),
            },
            PING => HubFrame::Ping,
            CLOSE => HubFrame::Close { error: raw.error },
            other => HubFrame::Other(other),
        })
    }
}

/// Serializes one record and appends the separator.
pub fn encode_record<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut encoded = serde_json::to_string(value)?;
    encoded.push(RECORD_SEPARATOR);
    Ok(encoded)
}

/// Splits a websocket text payload into its records. A single payload may
/// carry several frames; empty records are dropped.
pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}
