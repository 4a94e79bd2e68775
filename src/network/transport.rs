use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

pub type EventHandler = Box<dyn FnMut(Value) + Send>;

/// Inbound event handlers, at most one per event name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl HandlerRegistry {
    /// Register `handler` for `event`, replacing any earlier one.
    /// Returns `true` when a handler was replaced.
    pub fn subscribe(&mut self, event: impl Into<String>, handler: EventHandler) -> bool {
        self.handlers.insert(event.into(), handler).is_some()
    }

    pub fn unsubscribe(&mut self, event: &str) -> bool {
        self.handlers.remove(event).is_some()
    }

    pub fn unsubscribe_all(&mut self) {
        self.handlers.clear();
    }

    /// Run the handler for `event`. Returns `false` if nobody listens.
    pub fn dispatch(&mut self, event: &str, payload: Value) -> bool {
        match self.handlers.get_mut(event) {
            Some(handler) => {
                handler(payload);
                true
            }
            None => {
                log::debug!("No handler for `{event}`; dropping");
                false
            }
        }
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub type SharedRegistry = Arc<Mutex<HandlerRegistry>>;

/// Lock a registry shared with a reader task. A handler that panicked while
/// the lock was held leaves the map itself intact, so poisoning is ignored.
pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, HandlerRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The long-lived bidirectional event connection.
///
/// `send` is fire-and-forget. Subscriptions replace, never stack.
pub trait EventChannel: Send {
    fn send(&self, event: &str, payload: Value);
    fn subscribe(&mut self, event: &str, handler: EventHandler);
    fn unsubscribe(&mut self, event: &str);
    fn unsubscribe_all(&mut self);
    /// Whether the server has acknowledged setup on the current connection.
    fn is_ready(&self) -> bool;
    fn close(&mut self);
}

/// In-process channel: records what is sent and lets the caller inject
/// inbound events. Clones share the same state.
#[derive(Clone)]
pub struct MemoryChannel {
    registry: SharedRegistry,
    sent: Arc<Mutex<Vec<(String, Value)>>>,
    ready: Arc<Mutex<bool>>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HandlerRegistry::default())),
            sent: Arc::new(Mutex::new(Vec::new())),
            ready: Arc::new(Mutex::new(true)),
        }
    }

    /// Deliver an inbound event to the registered handler.
    pub fn inject(&self, event: &str, payload: Value) -> bool {
        lock_registry(&self.registry).dispatch(event, payload)
    }

    pub fn set_ready(&self, ready: bool) {
        *self.ready.lock().unwrap_or_else(|p| p.into_inner()) = ready;
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        lock_registry(&self.registry).is_subscribed(event)
    }

    pub fn subscription_count(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Drain everything sent so far.
    #[cfg(test)]
    pub fn take_sent(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn sent_named(&self, event: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl EventChannel for MemoryChannel {
    fn send(&self, event: &str, payload: Value) {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((event.to_string(), payload));
    }

    fn subscribe(&mut self, event: &str, handler: EventHandler) {
        lock_registry(&self.registry).subscribe(event, handler);
    }

    fn unsubscribe(&mut self, event: &str) {
        lock_registry(&self.registry).unsubscribe(event);
    }

    fn unsubscribe_all(&mut self) {
        lock_registry(&self.registry).unsubscribe_all();
    }

    fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn close(&mut self) {
        self.set_ready(false);
        self.unsubscribe_all();
    }
}
