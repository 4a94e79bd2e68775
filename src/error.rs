use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure of one of the REST collaborators (history, send, delete).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },
}

/// A frame from the realtime channel that could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type `{0}`")]
    UnknownPacket(char),
    #[error("event packet is not a non-empty array with a string name")]
    MalformedEvent,
    #[error("invalid JSON in frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server did not acknowledge setup within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    #[error("connection closed")]
    Closed,
}

/// Everything that can go wrong while synchronizing a conversation.
///
/// None of these are fatal: the session controller turns each one into a
/// local state change plus a user-visible indicator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to load messages for chat {conversation_id}: {source}")]
    Fetch {
        conversation_id: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to send message {client_ref}: {source}")]
    Send {
        client_ref: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to delete message {message_id}: {source}")]
    Delete {
        message_id: String,
        #[source]
        source: ApiError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}
