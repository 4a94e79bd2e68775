use crate::common::{Message, NotificationEntry};

/// Where an inbound message ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Belongs to the active conversation; the caller applies it.
    Active(Message),
    Queued,
    /// Already queued, or carries no id to key a notification on.
    Dropped,
}

/// Session-wide queue of messages that arrived for inactive conversations.
#[derive(Debug, Default, Clone)]
pub struct NotificationRouter {
    entries: Vec<NotificationEntry>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `message` given the active conversation id read at dispatch time.
    pub fn route(&mut self, active: Option<&str>, message: Message) -> Routed {
        if active == Some(message.conversation_id()) {
            return Routed::Active(message);
        }
        if self.push(message) {
            Routed::Queued
        } else {
            Routed::Dropped
        }
    }

    /// Queue a notification. Returns `false` for duplicates and id-less messages.
    pub fn push(&mut self, message: Message) -> bool {
        let Some(message_id) = message.id.clone() else {
            return false;
        };
        if self.contains(&message_id) {
            return false;
        }
        self.entries.push(NotificationEntry {
            message_id,
            conversation_id: message.conversation_id().to_string(),
            message,
        });
        true
    }

    /// Drop the entry for `message_id`, if any.
    pub fn clear(&mut self, message_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.message_id != message_id);
        before != self.entries.len()
    }

    pub fn clear_conversation(&mut self, conversation_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.conversation_id != conversation_id);
        before - self.entries.len()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.message_id == message_id)
    }

    #[cfg(test)]
    pub fn unread_in(&self, conversation_id: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.conversation_id == conversation_id)
            .count()
    }

    pub fn entries(&self) -> &[NotificationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
