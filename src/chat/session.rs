use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Conversation, Message, SessionCommand, SessionEvent, SessionUpdate, User};
use crate::error::{ApiError, SyncError};
use crate::network::protocol::{self, DeleteBroadcast, DeletedNotice, SeenReceipt};
use crate::network::{ChatApi, EventChannel, EventHandler};

use super::delivery::DeliveryTracker;
use super::notifications::{NotificationRouter, Routed};
use super::store::MessageStore;
use super::typing::{TypingPresence, TypingState};

/// Handlers that live only as long as one conversation activation.
const CONVERSATION_EVENTS: [&str; 4] = [
    protocol::TYPING,
    protocol::STOP_TYPING,
    protocol::MESSAGE_DELETED_FOR_EVERYONE,
    protocol::MESSAGE_DELETED_LOCALLY,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No page loaded: nothing selected, or the last fetch failed.
    #[default]
    Empty,
    Loading,
    Active,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub typing_timeout: Duration,
    pub peer_typing_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_millis(1000),
            peer_typing_timeout: Duration::from_millis(3000),
        }
    }
}

/// Owns the view of the active conversation and everything scoped to it.
///
/// All mutation happens in `handle_command` / `handle_event`, one input at a
/// time. Transport handlers only translate payloads into `SessionEvent`s;
/// which conversation is active is decided here, when the event is handled.
pub struct SessionController<C, A> {
    channel: C,
    api: Arc<A>,
    me: User,
    events: mpsc::UnboundedSender<SessionEvent>,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
    active: Option<Conversation>,
    activation: u64,
    phase: SessionPhase,
    fetch_task: Option<JoinHandle<()>>,
    store: MessageStore,
    delivery: DeliveryTracker,
    typing: TypingPresence,
    notifications: NotificationRouter,
    last_error: Option<SyncError>,
}

impl<C: EventChannel, A: ChatApi> SessionController<C, A> {
    pub fn new(
        channel: C,
        api: Arc<A>,
        me: User,
        settings: SyncSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let typing = TypingPresence::new(
            settings.typing_timeout,
            settings.peer_typing_timeout,
            events.clone(),
        );
        Self {
            channel,
            api,
            delivery: DeliveryTracker::new(me.id.clone()),
            me,
            events,
            updates: None,
            active: None,
            activation: 0,
            phase: SessionPhase::Empty,
            fetch_task: None,
            store: MessageStore::new(),
            typing,
            notifications: NotificationRouter::new(),
            last_error: None,
        }
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationRouter {
        &self.notifications
    }

    pub fn typing_state(&self) -> TypingState {
        self.typing.state()
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    /// Subscribe the session-wide handlers. Call once, before any command.
    pub fn start(&mut self) {
        self.channel.subscribe(
            protocol::CONNECTED,
            forward(&self.events, |_| Some(SessionEvent::Connected)),
        );
        self.channel.subscribe(
            protocol::MESSAGE_RECEIVED,
            forward(&self.events, |payload| {
                decode::<Message>(protocol::MESSAGE_RECEIVED, payload).map(SessionEvent::MessageReceived)
            }),
        );
        self.channel.subscribe(
            protocol::MESSAGE_SEEN,
            forward(&self.events, |payload| {
                decode::<SeenReceipt>(protocol::MESSAGE_SEEN, payload).map(|receipt| {
                    SessionEvent::MessageSeen {
                        message_id: receipt.message_id,
                        user_id: receipt.user_id,
                    }
                })
            }),
        );
    }

    /// Process commands and events until `Shutdown` or the command side hangs up.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        self.start();
        log::info!("Session started for user {}", self.me.id);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        self.shutdown();
    }

    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Select(conversation) => self.activate(conversation),
            SessionCommand::Clear => self.deactivate(),
            SessionCommand::Keystroke => self.keystroke(),
            SessionCommand::Send(content) => self.send_message(content),
            SessionCommand::Retry(client_ref) => self.retry(client_ref),
            SessionCommand::Delete(message_id) => self.delete_message(message_id),
            SessionCommand::Shutdown => self.shutdown(),
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                log::info!("Server acknowledged setup");
                self.acknowledge_unseen();
            }
            SessionEvent::MessageReceived(message) => self.on_message_received(message),
            SessionEvent::MessageSeen {
                message_id,
                user_id,
            } => {
                log::debug!("{user_id} saw message {message_id}");
                if self.store.mark_seen(&message_id) {
                    self.publish_timeline();
                }
                if self.notifications.clear(&message_id) {
                    self.publish_notifications();
                }
            }
            SessionEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => {
                if self.active_id() == Some(conversation_id.as_str())
                    && self.store.remove(&message_id).is_some()
                {
                    self.publish_timeline();
                }
                if self.notifications.clear(&message_id) {
                    self.publish_notifications();
                }
            }
            SessionEvent::PeerTyping { conversation_id } => {
                if self.active_id() == Some(conversation_id.as_str()) && self.typing.peer_started() {
                    self.publish(SessionUpdate::Typing(self.typing.state()));
                }
            }
            SessionEvent::PeerStoppedTyping { conversation_id } => {
                if self.active_id() == Some(conversation_id.as_str()) && self.typing.peer_stopped() {
                    self.publish(SessionUpdate::Typing(self.typing.state()));
                }
            }
            SessionEvent::PeerTypingExpired { timer } => {
                if self.typing.peer_expired(timer) {
                    self.publish(SessionUpdate::Typing(self.typing.state()));
                }
            }
            SessionEvent::LocalTypingExpired {
                conversation_id,
                timer,
            } => {
                if self.typing.local_expired(timer) && self.active_id() == Some(conversation_id.as_str()) {
                    self.channel
                        .send(protocol::STOP_TYPING, Value::String(conversation_id));
                }
            }
            SessionEvent::HistoryLoaded {
                conversation_id,
                activation,
                result,
            } => self.on_history_loaded(conversation_id, activation, result),
            SessionEvent::SendCompleted {
                conversation_id,
                activation,
                client_ref,
                result,
            } => self.on_send_completed(conversation_id, activation, client_ref, result),
            SessionEvent::DeleteCompleted {
                conversation_id,
                activation,
                message_id,
                result,
            } => self.on_delete_completed(conversation_id, activation, message_id, result),
        }
    }

    fn activate(&mut self, conversation: Conversation) {
        log::info!(
            "Opening chat {} ({})",
            conversation.id,
            conversation.display_name(&self.me.id)
        );
        self.teardown_conversation();
        self.activation += 1;

        let conversation_id = conversation.id.clone();
        self.active = Some(conversation);
        self.set_phase(SessionPhase::Loading);
        self.publish_timeline();

        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let activation = self.activation;
        self.fetch_task = Some(tokio::spawn(async move {
            let result = api.fetch_messages(&conversation_id).await;
            let _ = events.send(SessionEvent::HistoryLoaded {
                conversation_id,
                activation,
                result,
            });
        }));
    }

    fn deactivate(&mut self) {
        self.teardown_conversation();
        self.activation += 1;
        self.active = None;
        self.set_phase(SessionPhase::Empty);
    }

    /// Drop everything scoped to the current activation. Runs before any new
    /// fetch is issued so a late event cannot reach the next conversation.
    fn teardown_conversation(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        for event in CONVERSATION_EVENTS {
            self.channel.unsubscribe(event);
        }
        let was_typing = self.typing.state() != TypingState::Idle;
        self.typing.reset();
        if was_typing {
            self.publish(SessionUpdate::Typing(TypingState::Idle));
        }
        self.store.clear();
        self.delivery.reset();
    }

    fn shutdown(&mut self) {
        self.teardown_conversation();
        self.activation += 1;
        self.active = None;
        self.channel.unsubscribe_all();
        self.channel.close();
        self.set_phase(SessionPhase::Empty);
        log::info!("Session closed");
    }

    fn subscribe_conversation_handlers(&mut self, conversation_id: &str) {
        let scope = conversation_id.to_string();
        self.channel.subscribe(
            protocol::TYPING,
            forward(&self.events, move |payload| {
                Some(SessionEvent::PeerTyping {
                    conversation_id: payload_conversation(&payload).unwrap_or_else(|| scope.clone()),
                })
            }),
        );

        let scope = conversation_id.to_string();
        self.channel.subscribe(
            protocol::STOP_TYPING,
            forward(&self.events, move |payload| {
                Some(SessionEvent::PeerStoppedTyping {
                    conversation_id: payload_conversation(&payload).unwrap_or_else(|| scope.clone()),
                })
            }),
        );

        for event in [
            protocol::MESSAGE_DELETED_FOR_EVERYONE,
            protocol::MESSAGE_DELETED_LOCALLY,
        ] {
            let scope = conversation_id.to_string();
            self.channel.subscribe(
                event,
                forward(&self.events, move |payload| {
                    decode::<DeletedNotice>(event, payload).map(|notice| SessionEvent::MessageDeleted {
                        conversation_id: scope.clone(),
                        message_id: notice.message_id,
                    })
                }),
            );
        }
    }

    fn on_history_loaded(
        &mut self,
        conversation_id: String,
        activation: u64,
        result: Result<Vec<Message>, ApiError>,
    ) {
        if !self.is_current(&conversation_id, activation) {
            log::debug!("Discarding stale page for chat {conversation_id}");
            return;
        }
        self.fetch_task = None;

        match result {
            Ok(page) => {
                log::info!("Loaded {} messages for chat {conversation_id}", page.len());
                self.store.rebase(page);
                self.set_phase(SessionPhase::Active);
            }
            Err(source) => {
                self.set_phase(SessionPhase::Empty);
                self.report(SyncError::Fetch {
                    conversation_id: conversation_id.clone(),
                    source,
                });
            }
        }

        // Live traffic still flows after a failed fetch; reselecting retries the page.
        self.subscribe_conversation_handlers(&conversation_id);
        self.channel
            .send(protocol::JOIN_CHAT, Value::String(conversation_id.clone()));
        self.acknowledge_unseen();

        if self.phase == SessionPhase::Active && self.notifications.clear_conversation(&conversation_id) > 0 {
            self.publish_notifications();
        }
        self.publish_timeline();
    }

    fn on_message_received(&mut self, message: Message) {
        let active = self.active.as_ref().map(|conversation| conversation.id.as_str());
        match self.notifications.route(active, message) {
            Routed::Active(message) => {
                self.store.upsert_incoming(message);
                self.acknowledge_unseen();
                self.publish_timeline();
            }
            Routed::Queued => self.publish_notifications(),
            Routed::Dropped => {}
        }
    }

    fn keystroke(&mut self) {
        let Some(conversation_id) = self.active_id().map(str::to_owned) else {
            return;
        };
        self.channel
            .send(protocol::TYPING, Value::String(conversation_id.clone()));
        self.typing.keystroke(&conversation_id);
    }

    fn send_message(&mut self, content: String) {
        if content.trim().is_empty() {
            return;
        }
        let Some(conversation) = self.active.as_ref() else {
            log::warn!("No chat selected; dropping message");
            return;
        };
        let conversation_id = conversation.id.clone();
        let draft = Message::draft(conversation, &self.me, content.clone());
        let client_ref = self.store.append_optimistic(draft);
        self.publish_timeline();
        self.dispatch_send(conversation_id, client_ref, content);
    }

    fn retry(&mut self, client_ref: String) {
        let Some(conversation_id) = self.active_id().map(str::to_owned) else {
            return;
        };
        match self.store.retry(&client_ref) {
            Some(content) => {
                self.publish_timeline();
                self.dispatch_send(conversation_id, client_ref, content);
            }
            None => log::warn!("No failed message {client_ref} to retry"),
        }
    }

    fn dispatch_send(&mut self, conversation_id: String, client_ref: String, content: String) {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let activation = self.activation;
        tokio::spawn(async move {
            let result = api.send_message(&conversation_id, &content).await;
            let _ = events.send(SessionEvent::SendCompleted {
                conversation_id,
                activation,
                client_ref,
                result,
            });
        });
    }

    fn on_send_completed(
        &mut self,
        conversation_id: String,
        activation: u64,
        client_ref: String,
        result: Result<Message, ApiError>,
    ) {
        let current = self.is_current(&conversation_id, activation);
        match result {
            Ok(message) => {
                // The server has it either way; peers learn about it from the broadcast.
                self.emit(protocol::SEND_MESSAGE, &message);
                if !current {
                    log::debug!("Send for chat {conversation_id} resolved after a switch");
                } else if self.store.confirm(&client_ref, message) {
                    self.publish_timeline();
                }
            }
            Err(source) => {
                if current && self.store.fail(&client_ref) {
                    self.publish_timeline();
                }
                self.report(SyncError::Send { client_ref, source });
            }
        }
    }

    fn delete_message(&mut self, message_id: String) {
        let Some(conversation_id) = self.active_id().map(str::to_owned) else {
            return;
        };
        if self.store.get(&message_id).is_none() {
            log::warn!("Message {message_id} is not in chat {conversation_id}");
            return;
        }

        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let activation = self.activation;
        tokio::spawn(async move {
            let result = api.delete_message(&message_id).await;
            let _ = events.send(SessionEvent::DeleteCompleted {
                conversation_id,
                activation,
                message_id,
                result,
            });
        });
    }

    fn on_delete_completed(
        &mut self,
        conversation_id: String,
        activation: u64,
        message_id: String,
        result: Result<(), ApiError>,
    ) {
        match result {
            Ok(()) => {
                self.emit(
                    protocol::MESSAGE_DELETED,
                    &DeleteBroadcast {
                        message_id: message_id.clone(),
                        chat_id: conversation_id.clone(),
                        is_sender: true,
                    },
                );
                if self.is_current(&conversation_id, activation) && self.store.remove(&message_id).is_some() {
                    self.publish_timeline();
                }
            }
            Err(source) => self.report(SyncError::Delete { message_id, source }),
        }
    }

    /// Emit a seen-acknowledgement for each unseen message from someone else.
    fn acknowledge_unseen(&mut self) {
        if !self.channel.is_ready() {
            return;
        }
        let Some(conversation_id) = self.active_id().map(str::to_owned) else {
            return;
        };
        for ack in self.delivery.pending_acks(&conversation_id, &self.store) {
            self.emit(protocol::MARK_MESSAGE_AS_SEEN, &ack);
        }
    }

    fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|conversation| conversation.id.as_str())
    }

    fn is_current(&self, conversation_id: &str, activation: u64) -> bool {
        activation == self.activation && self.active_id() == Some(conversation_id)
    }

    fn emit<T: Serialize>(&self, event: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.channel.send(event, value),
            Err(err) => log::warn!("Failed to serialize `{event}` payload: {err}"),
        }
    }

    fn report(&mut self, err: SyncError) {
        log::warn!("{err}");
        self.publish(SessionUpdate::Error(err.to_string()));
        self.last_error = Some(err);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.publish(SessionUpdate::Phase(phase));
        }
    }

    fn publish(&self, update: SessionUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }

    fn publish_timeline(&self) {
        if self.updates.is_none() {
            return;
        }
        if let Some(conversation_id) = self.active_id() {
            self.publish(SessionUpdate::Timeline {
                conversation_id: conversation_id.to_string(),
                messages: self.store.messages().to_vec(),
            });
        }
    }

    fn publish_notifications(&self) {
        if self.updates.is_some() {
            self.publish(SessionUpdate::Notifications(
                self.notifications.entries().to_vec(),
            ));
        }
    }
}

/// Wrap a payload parser into a handler that feeds the session queue.
fn forward<F>(events: &mpsc::UnboundedSender<SessionEvent>, parse: F) -> EventHandler
where
    F: Fn(Value) -> Option<SessionEvent> + Send + 'static,
{
    let events = events.clone();
    Box::new(move |payload: Value| {
        if let Some(event) = parse(payload) {
            let _ = events.send(event);
        }
    })
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Dropping malformed `{event}` payload: {err}");
            None
        }
    }
}

/// Typing events may carry the chat id bare or inside an object; the server
/// also sends them without any payload to the room.
fn payload_conversation(payload: &Value) -> Option<String> {
    match payload {
        Value::String(id) => Some(id.clone()),
        Value::Object(fields) => fields
            .get("chatId")
            .or_else(|| fields.get("conversationId"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}
