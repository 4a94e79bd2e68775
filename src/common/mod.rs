pub mod commands;
pub mod events;
pub mod types;

pub use commands::SessionCommand;
pub use events::{SessionEvent, SessionUpdate};
pub use types::{ChatId, ChatRef, Conversation, DeliveryState, Message, NotificationEntry, User};
