//! Client-side message synchronisation for a Socket.IO chat server.
//!
//! `chat` holds the per-session state machine, `network` the realtime
//! channel and REST collaborators it talks to.

pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;

pub use chat::{SessionController, SessionPhase, SyncSettings};
pub use common::{Conversation, Message, SessionCommand, SessionEvent, SessionUpdate, User};
pub use config::AppConfig;
pub use error::{ApiError, SyncError, TransportError};
