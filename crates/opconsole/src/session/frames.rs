//! JSON frames exchanged with the terminal gateway.
//!
//! Every frame is a WebSocket text message tagged by `event`. Byte payloads
//! travel base64-encoded in `bytes`.

use std::fmt;

use opconsole_api::Device;
use opconsole_api::SessionCredentials;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundFrame {
    Start {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    InteractiveCommand {
        text: String,
    },
    Data {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

impl OutboundFrame {
    pub fn start(device: &Device, credentials: &SessionCredentials) -> Self {
        OutboundFrame::Start {
            host: device.ip_address.clone(),
            port: device.port(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        }
    }

    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        OutboundFrame::Data {
            bytes: bytes.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundFrame::Start { .. } => "start",
            OutboundFrame::Resize { .. } => "resize",
            OutboundFrame::InteractiveCommand { .. } => "interactive_command",
            OutboundFrame::Data { .. } => "data",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::Start {
                host,
                port,
                username,
                ..
            } => f
                .debug_struct("Start")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            OutboundFrame::Resize { cols, rows } => f
                .debug_struct("Resize")
                .field("cols", cols)
                .field("rows", rows)
                .finish(),
            OutboundFrame::InteractiveCommand { text } => f
                .debug_struct("InteractiveCommand")
                .field("text", text)
                .finish(),
            OutboundFrame::Data { bytes } => f
                .debug_struct("Data")
                .field("bytes", &String::from_utf8_lossy(bytes))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundFrame {
    Data {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    Error {
        #[serde(default)]
        reason: String,
    },
    Disconnect,
}

impl InboundFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
