//! Socket.IO v4 framing over Engine.IO v4, plus the event names and payload
//! shapes the chat server speaks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

pub const SETUP: &str = "setup";
pub const CONNECTED: &str = "connected";
pub const JOIN_CHAT: &str = "join chat";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop typing";
pub const SEND_MESSAGE: &str = "send message";
pub const MESSAGE_RECEIVED: &str = "message received";
pub const MARK_MESSAGE_AS_SEEN: &str = "markMessageAsSeen";
pub const MESSAGE_SEEN: &str = "messageSeen";
pub const MESSAGE_DELETED: &str = "message deleted";
pub const MESSAGE_DELETED_FOR_EVERYONE: &str = "message deleted for everyone";
pub const MESSAGE_DELETED_LOCALLY: &str = "message deleted locally";

/// Engine.IO pong, sent in reply to a server ping.
pub const PONG_FRAME: &str = "3";
/// Socket.IO connect to the default namespace.
pub const CONNECT_FRAME: &str = "40";
pub const DISCONNECT_FRAME: &str = "41";

/// Engine.IO handshake sent by the server right after the upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// Longest silence allowed before the connection counts as dead: the
    /// server pings every `ping_interval` and waits `ping_timeout` for a reply.
    pub fn liveness(&self) -> Option<Duration> {
        if self.ping_interval == 0 {
            return None;
        }
        Some(Duration::from_millis(self.ping_interval + self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    Disconnect,
    Event { name: String, payload: Value },
    Ack,
    ConnectError(Value),
}

/// Outbound `markMessageAsSeen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenAck {
    pub chat_id: String,
    pub message_id: String,
    pub user_id: String,
}

/// Inbound `messageSeen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub message_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// Inbound `message deleted for everyone` / `message deleted locally`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedNotice {
    pub message_id: String,
}

/// Outbound `message deleted`, sent once the server has removed the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBroadcast {
    pub message_id: String,
    pub chat_id: String,
    pub is_sender: bool,
}

/// Frame an event as `42["name",payload]`; a null payload is left out.
pub fn encode_event(name: &str, payload: &Value) -> String {
    let args = if payload.is_null() {
        Value::Array(vec![Value::String(name.to_string())])
    } else {
        Value::Array(vec![Value::String(name.to_string()), payload.clone()])
    };
    format!("42{args}")
}

pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownPacket(other)),
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let data = skip_namespace(chars.as_str());

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(skip_ack_id(data)),
        '3' => Ok(Packet::Ack),
        '4' => {
            let detail = if data.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(data)?
            };
            Ok(Packet::ConnectError(detail))
        }
        other => Err(ProtocolError::UnknownPacket(other)),
    }
}

fn decode_event(data: &str) -> Result<Packet, ProtocolError> {
    let args: Vec<Value> = serde_json::from_str(data)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(ProtocolError::MalformedEvent),
    };
    // Only single-argument events are in use; extra arguments are ignored.
    let payload = args.next().unwrap_or(Value::Null);
    Ok(Packet::Event { name, payload })
}

/// `/admin,["x"]` → `["x"]`. The default namespace carries no prefix.
fn skip_namespace(data: &str) -> &str {
    if data.starts_with('/') {
        match data.find(',') {
            Some(idx) => &data[idx + 1..],
            None => "",
        }
    } else {
        data
    }
}

fn skip_ack_id(data: &str) -> &str {
    data.trim_start_matches(|c: char| c.is_ascii_digit())
}
