use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::SessionEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypingState {
    #[default]
    Idle,
    PeerTyping,
}

/// A pending timeout. Dropping it cancels the timeout.
#[derive(Debug)]
struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Peer typing indicator plus the local inactivity timer.
///
/// Expiry is reported back through the session event queue tagged with the
/// timer id; an expiry whose id is no longer current is ignored.
pub struct TypingPresence {
    state: TypingState,
    local_timeout: Duration,
    peer_timeout: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_timer: u64,
    local_timer: Option<Timer>,
    peer_timer: Option<Timer>,
}

impl TypingPresence {
    pub fn new(
        local_timeout: Duration,
        peer_timeout: Duration,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            state: TypingState::Idle,
            local_timeout,
            peer_timeout,
            events,
            next_timer: 0,
            local_timer: None,
            peer_timer: None,
        }
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    #[cfg(test)]
    pub fn is_local_armed(&self) -> bool {
        self.local_timer.is_some()
    }

    /// (Re)start the local inactivity timer for `conversation_id`.
    pub fn keystroke(&mut self, conversation_id: &str) {
        let conversation_id = conversation_id.to_string();
        let timer = self.spawn_timer(self.local_timeout, move |timer| {
            SessionEvent::LocalTypingExpired {
                conversation_id,
                timer,
            }
        });
        self.local_timer = Some(timer);
    }

    /// Returns `true` if `timer` is the armed local timer, disarming it.
    pub fn local_expired(&mut self, timer: u64) -> bool {
        match &self.local_timer {
            Some(current) if current.id == timer => {
                self.local_timer = None;
                true
            }
            _ => false,
        }
    }

    /// `Idle → PeerTyping`. Returns `true` if the state changed.
    pub fn peer_started(&mut self) -> bool {
        let timer = self.spawn_timer(self.peer_timeout, |timer| SessionEvent::PeerTypingExpired { timer });
        self.peer_timer = Some(timer);
        self.transition(TypingState::PeerTyping)
    }

    /// `PeerTyping → Idle`. Returns `true` if the state changed.
    pub fn peer_stopped(&mut self) -> bool {
        self.peer_timer = None;
        self.transition(TypingState::Idle)
    }

    pub fn peer_expired(&mut self, timer: u64) -> bool {
        match &self.peer_timer {
            Some(current) if current.id == timer => self.peer_stopped(),
            _ => false,
        }
    }

    /// Cancel both timers and go back to `Idle`.
    pub fn reset(&mut self) {
        self.local_timer = None;
        self.peer_timer = None;
        self.state = TypingState::Idle;
    }

    fn transition(&mut self, next: TypingState) -> bool {
        let changed = self.state != next;
        self.state = next;
        changed
    }

    fn spawn_timer<F>(&mut self, after: Duration, event: F) -> Timer
    where
        F: FnOnce(u64) -> SessionEvent + Send + 'static,
    {
        self.next_timer += 1;
        let id = self.next_timer;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(event(id));
        });
        Timer { id, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: Duration = Duration::from_millis(1000);
    const PEER: Duration = Duration::from_millis(3000);

    fn presence() -> (TypingPresence, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TypingPresence::new(LOCAL, PEER, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn local_timer_fires_after_inactivity() {
        let (mut typing, mut rx) = presence();
        typing.keystroke("c1");

        tokio::time::sleep(Duration::from_millis(1001)).await;

        match rx.try_recv() {
            Ok(SessionEvent::LocalTypingExpired {
                conversation_id,
                timer,
            }) => {
                assert_eq!(conversation_id, "c1");
                assert!(typing.local_expired(timer));
                assert!(!typing.is_local_armed());
            }
            other => panic!("expected local expiry, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_restart_the_timer() {
        let (mut typing, mut rx) = presence();
        typing.keystroke("c1");
        tokio::time::sleep(Duration::from_millis(600)).await;
        typing.keystroke("c1");
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(rx.try_recv().is_err(), "first timer must have been cancelled");

        tokio::time::sleep(Duration::from_millis(500)).await;
        match rx.try_recv() {
            Ok(SessionEvent::LocalTypingExpired { timer, .. }) => assert!(typing.local_expired(timer)),
            other => panic!("expected local expiry, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_is_ignored() {
        let (mut typing, _rx) = presence();
        typing.keystroke("c1");
        typing.keystroke("c1");
        assert!(!typing.local_expired(1));
        assert!(typing.local_expired(2));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_timers() {
        let (mut typing, mut rx) = presence();
        typing.keystroke("c1");
        typing.peer_started();

        typing.reset();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(typing.state(), TypingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_typing_transitions() {
        let (mut typing, mut rx) = presence();
        assert!(typing.peer_started());
        assert!(!typing.peer_started());
        assert_eq!(typing.state(), TypingState::PeerTyping);

        assert!(typing.peer_stopped());
        assert!(!typing.peer_stopped());

        typing.peer_started();
        tokio::time::sleep(Duration::from_millis(3001)).await;
        match rx.try_recv() {
            Ok(SessionEvent::PeerTypingExpired { timer }) => assert!(typing.peer_expired(timer)),
            other => panic!("expected peer expiry, got {other:?}"),
        }
        assert_eq!(typing.state(), TypingState::Idle);
    }
}
