use std::collections::HashSet;

use crate::network::protocol::SeenAck;

use super::store::MessageStore;

/// Tracks which visible messages still need a seen-acknowledgement from us.
///
/// Re-acknowledging is harmless on the server, so the `acknowledged` set is
/// only there to avoid resending on every change. It is scoped to one
/// conversation activation.
#[derive(Debug, Clone)]
pub struct DeliveryTracker {
    self_id: String,
    acknowledged: HashSet<String>,
}

impl DeliveryTracker {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            acknowledged: HashSet::new(),
        }
    }

    /// Acknowledgements for every unseen message from someone else that has
    /// not been acknowledged yet in this activation.
    pub fn pending_acks(&mut self, conversation_id: &str, store: &MessageStore) -> Vec<SeenAck> {
        let mut acks = Vec::new();
        for message in store.iter() {
            if message.seen || message.sender_id() == self.self_id {
                continue;
            }
            let Some(id) = message.id.as_deref() else {
                continue;
            };
            if self.acknowledged.insert(id.to_string()) {
                acks.push(SeenAck {
                    chat_id: conversation_id.to_string(),
                    message_id: id.to_string(),
                    user_id: self.self_id.clone(),
                });
            }
        }
        acks
    }

    #[cfg(test)]
    pub fn is_acknowledged(&self, message_id: &str) -> bool {
        self.acknowledged.contains(message_id)
    }

    pub fn reset(&mut self) {
        self.acknowledged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChatRef, Conversation, DeliveryState, Message, User};
    use chrono::Utc;

    fn message(id: &str, sender: &str, seen: bool) -> Message {
        Message {
            id: Some(id.into()),
            client_ref: None,
            chat: ChatRef::Id("c1".into()),
            sender: User::new(sender, sender),
            content: String::new(),
            created_at: Utc::now(),
            seen,
            delivery_state: DeliveryState::Sent,
            extra: Default::default(),
        }
    }

    #[test]
    fn acknowledges_only_unseen_messages_from_others() {
        let mut store = MessageStore::new();
        store.load(vec![
            message("m1", "peer", false),
            message("m2", "me", false),
            message("m3", "peer", true),
            message("m4", "peer", false),
        ]);
        store.append_optimistic(Message::draft(
            &Conversation::from_id("c1"),
            &User::new("me", "Me"),
            "draft",
        ));

        let mut tracker = DeliveryTracker::new("me");
        let acks = tracker.pending_acks("c1", &store);

        let ids: Vec<_> = acks.iter().map(|ack| ack.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m4"]);
        assert!(acks.iter().all(|ack| ack.chat_id == "c1" && ack.user_id == "me"));
    }

    #[test]
    fn does_not_resend_within_an_activation() {
        let mut store = MessageStore::new();
        store.load(vec![message("m1", "peer", false)]);
        let mut tracker = DeliveryTracker::new("me");

        assert_eq!(tracker.pending_acks("c1", &store).len(), 1);
        assert!(tracker.pending_acks("c1", &store).is_empty());
        assert!(tracker.is_acknowledged("m1"));

        store.upsert_incoming(message("m2", "peer", false));
        assert_eq!(tracker.pending_acks("c1", &store).len(), 1);

        tracker.reset();
        assert_eq!(tracker.pending_acks("c1", &store).len(), 2);
    }
}
