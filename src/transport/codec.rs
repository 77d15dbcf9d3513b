//! Text framing for Engine.IO v4 / Socket.IO v5 over WebSocket.
//!
//! Every WebSocket text frame is one Engine.IO packet: a single type digit
//! followed by its payload. Message packets (`4`) carry a Socket.IO packet:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json data>]
//! 42/notifications,["shipment-update",{"id":7}]
//! ```
//!
//! Binary packets (`5`, `6`) need out-of-band attachments and are rejected.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root namespace
pub const ROOT_NAMESPACE: &str = "/";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("binary packets are not supported")]
    Binary,
    #[error("invalid ack id")]
    InvalidAckId,
    #[error("invalid packet data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters sent by the server in the open packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl SocketPacketKind {
    fn as_char(self) -> char {
        match self {
            SocketPacketKind::Connect => '0',
            SocketPacketKind::Disconnect => '1',
            SocketPacketKind::Event => '2',
            SocketPacketKind::Ack => '3',
            SocketPacketKind::ConnectError => '4',
        }
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketKind,
    pub namespace: String,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace connect request, optionally with an auth payload
    pub fn connect(namespace: &str, auth: Option<Value>) -> Self {
        Self {
            kind: SocketPacketKind::Connect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: auth,
        }
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: SocketPacketKind::Disconnect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: None,
        }
    }

    /// Event with a single argument
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        Self {
            kind: SocketPacketKind::Event,
            namespace: namespace.to_string(),
            ack_id: None,
            data: Some(Value::Array(vec![Value::String(name.to_string()), payload])),
        }
    }

    /// Event name and first argument (`Null` when the event has none)
    pub fn event_parts(&self) -> Option<(&str, &Value)> {
        if self.kind != SocketPacketKind::Event {
            return None;
        }
        match &self.data {
            Some(Value::Array(items)) => {
                let name = items.first()?.as_str()?;
                Some((name, items.get(1).unwrap_or(&Value::Null)))
            }
            _ => None,
        }
    }

    /// Error message of a connect_error packet
    pub fn error_message(&self) -> Option<String> {
        if self.kind != SocketPacketKind::ConnectError {
            return None;
        }
        let message = match &self.data {
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        Some(message.unwrap_or_else(|| "connection refused".to_string()))
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.namespace != ROOT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            let _ = write!(out, "{}", id);
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let kind = match text.as_bytes().first() {
            None => return Err(CodecError::Empty),
            Some(b'0') => SocketPacketKind::Connect,
            Some(b'1') => SocketPacketKind::Disconnect,
            Some(b'2') => SocketPacketKind::Event,
            Some(b'3') => SocketPacketKind::Ack,
            Some(b'4') => SocketPacketKind::ConnectError,
            Some(b'5') | Some(b'6') => return Err(CodecError::Binary),
            Some(_) => {
                let c = text.chars().next().unwrap_or('?');
                return Err(CodecError::UnknownSocketType(c));
            }
        };
        let mut rest = &text[1..];

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    let ns = &rest[..end];
                    rest = &rest[end + 1..];
                    ns
                }
                None => std::mem::take(&mut rest),
            }
        } else {
            ROOT_NAMESPACE
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|_| CodecError::InvalidAckId)?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            ack_id,
            data,
        })
    }
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(open) => {
                format!("0{}", serde_json::to_string(open).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data.as_deref().unwrap_or("")),
            EnginePacket::Pong(data) => format!("3{}", data.as_deref().unwrap_or("")),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let first = text.chars().next().ok_or(CodecError::Empty)?;
        let rest = &text[first.len_utf8()..];
        let payload = || (!rest.is_empty()).then(|| rest.to_string());

        match first {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(payload())),
            '3' => Ok(EnginePacket::Pong(payload())),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(CodecError::UnknownEngineType(other)),
        }
    }
}
