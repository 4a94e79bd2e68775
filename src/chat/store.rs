use crate::common::{DeliveryState, Message};

/// What `upsert_incoming` did with a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    /// The message had no server id and was dropped.
    Ignored,
}

/// Ordered, deduplicated messages of the active conversation.
///
/// Entries are unique by server id when they have one, else by client
/// reference. Order is insertion order; nothing is re-sorted after the fact.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a server-fetched page, in arrival order.
    pub fn load(&mut self, page: Vec<Message>) {
        self.messages.clear();
        for message in page {
            if message.id.is_some() {
                self.upsert_incoming(message);
            }
        }
    }

    /// Load `page`, then re-apply whatever the store already held that the
    /// page does not contain (live arrivals and sends made while loading).
    pub fn rebase(&mut self, page: Vec<Message>) {
        let early = std::mem::take(&mut self.messages);
        self.load(page);
        for message in early {
            if message.id.is_some() {
                self.upsert_incoming(message);
            } else {
                self.messages.push(message);
            }
        }
    }

    /// Insert a locally composed message as `Pending` and return its client
    /// reference. A reference is generated if the draft lacks one.
    pub fn append_optimistic(&mut self, mut message: Message) -> String {
        let client_ref = message
            .client_ref
            .get_or_insert_with(crate::common::types::new_client_ref)
            .clone();
        message.id = None;
        message.delivery_state = DeliveryState::Pending;
        self.messages.push(message);
        client_ref
    }

    /// Swap the optimistic entry for the server's copy. Returns `false`, with
    /// no change, if nothing matches `client_ref`.
    pub fn confirm(&mut self, client_ref: &str, mut confirmed: Message) -> bool {
        let Some(idx) = self.position_by_ref(client_ref) else {
            return false;
        };
        confirmed.client_ref = Some(client_ref.to_string());
        confirmed.delivery_state = DeliveryState::Sent;

        let echoed = confirmed
            .id
            .as_deref()
            .and_then(|id| self.position_by_id(id));
        match echoed {
            // The broadcast echo beat the REST response: keep the echo's slot.
            Some(existing) => {
                confirmed.seen |= self.messages[existing].seen;
                self.messages[existing] = confirmed;
                self.messages.remove(idx);
            }
            None => self.messages[idx] = confirmed,
        }
        true
    }

    pub fn fail(&mut self, client_ref: &str) -> bool {
        match self.position_by_ref(client_ref) {
            Some(idx) if self.messages[idx].delivery_state == DeliveryState::Pending => {
                self.messages[idx].delivery_state = DeliveryState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Put a failed entry back to `Pending` and return its content.
    pub fn retry(&mut self, client_ref: &str) -> Option<String> {
        let idx = self.position_by_ref(client_ref)?;
        let message = &mut self.messages[idx];
        if message.delivery_state != DeliveryState::Failed {
            return None;
        }
        message.delivery_state = DeliveryState::Pending;
        Some(message.content.clone())
    }

    /// Insert a live message, replacing any entry with the same id in place.
    pub fn upsert_incoming(&mut self, mut message: Message) -> Upsert {
        let Some(id) = message.id.as_deref() else {
            log::debug!("Ignoring live message without an id");
            return Upsert::Ignored;
        };
        message.delivery_state = DeliveryState::Sent;

        match self.position_by_id(id) {
            Some(idx) => {
                let existing = &self.messages[idx];
                message.seen |= existing.seen;
                if message.client_ref.is_none() {
                    message.client_ref = existing.client_ref.clone();
                }
                self.messages[idx] = message;
                Upsert::Replaced
            }
            None => {
                self.messages.push(message);
                Upsert::Inserted
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let idx = self.position_by_id(id)?;
        Some(self.messages.remove(idx))
    }

    /// Returns `true` only if the flag actually flipped.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        match self.position_by_id(id) {
            Some(idx) if !self.messages[idx].seen => {
                self.messages[idx].seen = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.position_by_id(id).map(|idx| &self.messages[idx])
    }

    pub fn get_by_ref(&self, client_ref: &str) -> Option<&Message> {
        self.position_by_ref(client_ref).map(|idx| &self.messages[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.id.as_deref() == Some(id))
    }

    fn position_by_ref(&self, client_ref: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.client_ref.as_deref() == Some(client_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChatRef, Conversation, User};
    use chrono::{TimeZone, Utc};

    fn server_message(id: &str, sender: &str) -> Message {
        Message {
            id: Some(id.to_string()),
            client_ref: None,
            chat: ChatRef::Id("c1".into()),
            sender: User::new(sender, sender),
            content: format!("message {id}"),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            seen: false,
            delivery_state: DeliveryState::Sent,
            extra: Default::default(),
        }
    }

    fn draft(content: &str) -> Message {
        Message::draft(&Conversation::from_id("c1"), &User::new("me", "Me"), content)
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.iter().filter_map(|m| m.id.clone()).collect()
    }

    #[test]
    fn load_keeps_arrival_order_and_incoming_appends() {
        let mut store = MessageStore::new();
        store.load(vec![
            server_message("m1", "a"),
            server_message("m2", "b"),
            server_message("m3", "a"),
        ]);
        assert_eq!(ids(&store), ["m1", "m2", "m3"]);

        assert_eq!(store.upsert_incoming(server_message("m4", "b")), Upsert::Inserted);
        assert_eq!(ids(&store), ["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn load_replaces_wholesale() {
        let mut store = MessageStore::new();
        store.load(vec![server_message("old", "a")]);
        store.load(vec![server_message("new", "a")]);
        assert_eq!(ids(&store), ["new"]);
    }

    #[test]
    fn duplicate_incoming_replaces_in_place() {
        let mut store = MessageStore::new();
        store.load(vec![server_message("m1", "a"), server_message("m2", "b")]);

        let mut edited = server_message("m1", "a");
        edited.content = "edited".into();
        assert_eq!(store.upsert_incoming(edited), Upsert::Replaced);

        assert_eq!(ids(&store), ["m1", "m2"]);
        assert_eq!(store.get("m1").unwrap().content, "edited");
    }

    #[test]
    fn redelivery_does_not_unsee() {
        let mut store = MessageStore::new();
        store.upsert_incoming(server_message("m1", "a"));
        store.mark_seen("m1");
        store.upsert_incoming(server_message("m1", "a"));
        assert!(store.get("m1").unwrap().seen);
    }

    #[test]
    fn confirm_then_echo_leaves_one_entry() {
        let mut store = MessageStore::new();
        let client_ref = store.append_optimistic(draft("hi"));

        assert!(store.confirm(&client_ref, server_message("42", "me")));
        store.upsert_incoming(server_message("42", "me"));

        assert_eq!(store.len(), 1);
        assert_eq!(ids(&store), ["42"]);
    }

    #[test]
    fn echo_then_confirm_leaves_one_entry() {
        let mut store = MessageStore::new();
        let client_ref = store.append_optimistic(draft("hi"));

        store.upsert_incoming(server_message("42", "me"));
        assert_eq!(store.len(), 2);
        assert!(store.confirm(&client_ref, server_message("42", "me")));

        assert_eq!(store.len(), 1);
        let only = store.get("42").unwrap();
        assert_eq!(only.delivery_state, DeliveryState::Sent);
        assert_eq!(only.client_ref.as_deref(), Some(client_ref.as_str()));
    }

    #[test]
    fn optimistic_confirm_lifecycle() {
        let mut store = MessageStore::new();
        let client_ref = store.append_optimistic(draft("hi"));
        assert_eq!(store.messages()[0].delivery_state, DeliveryState::Pending);

        assert!(store.confirm(&client_ref, server_message("42", "me")));

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id.as_deref(), Some("42"));
        assert_eq!(store.messages()[0].delivery_state, DeliveryState::Sent);
    }

    #[test]
    fn optimistic_fail_lifecycle() {
        let mut store = MessageStore::new();
        let client_ref = store.append_optimistic(draft("hi"));

        assert!(store.fail(&client_ref));

        assert_eq!(store.len(), 1);
        let entry = store.get_by_ref(&client_ref).unwrap();
        assert_eq!(entry.delivery_state, DeliveryState::Failed);
        assert!(entry.id.is_none());

        assert_eq!(store.retry(&client_ref).as_deref(), Some("hi"));
        assert_eq!(
            store.get_by_ref(&client_ref).unwrap().delivery_state,
            DeliveryState::Pending
        );
        assert!(store.retry(&client_ref).is_none());
    }

    #[test]
    fn late_confirmation_is_a_no_op() {
        let mut store = MessageStore::new();
        store.load(vec![server_message("m1", "a")]);
        let before = store.messages().to_vec();

        assert!(!store.confirm("temp-missing", server_message("42", "me")));
        assert!(!store.fail("temp-missing"));
        assert_eq!(store.messages(), before.as_slice());
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let mut store = MessageStore::new();
        store.load(vec![server_message("m1", "a")]);

        assert!(store.mark_seen("m1"));
        let once = store.messages().to_vec();
        assert!(!store.mark_seen("m1"));
        assert_eq!(store.messages(), once.as_slice());
        assert!(!store.mark_seen("absent"));
    }

    #[test]
    fn remove_by_id() {
        let mut store = MessageStore::new();
        store.load(vec![server_message("m1", "a"), server_message("m2", "b")]);
        assert!(store.remove("m1").is_some());
        assert!(store.remove("m1").is_none());
        assert_eq!(ids(&store), ["m2"]);
    }

    #[test]
    fn rebase_keeps_messages_that_raced_the_page() {
        let mut store = MessageStore::new();
        store.upsert_incoming(server_message("m3", "b"));
        store.upsert_incoming(server_message("m9", "b"));
        let client_ref = store.append_optimistic(draft("typed while loading"));

        store.rebase(vec![
            server_message("m1", "a"),
            server_message("m2", "a"),
            server_message("m3", "b"),
        ]);

        assert_eq!(ids(&store), ["m1", "m2", "m3", "m9"]);
        assert_eq!(store.len(), 5);
        assert!(store.get_by_ref(&client_ref).is_some());
    }
}
