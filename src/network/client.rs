use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::TransportError;

use super::protocol::{self, Packet};
use super::transport::{EventChannel, EventHandler, SharedRegistry, lock_registry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub server_url: String,
    pub user_id: String,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

/// `http://host:5000/` → `ws://host:5000/socket.io/?EIO=4&transport=websocket`
pub fn socket_endpoint(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{SOCKET_PATH}")
}

enum Outbound {
    Event { name: String, payload: Value },
    Close,
}

enum SessionEnd {
    /// Closed on purpose; do not reconnect.
    Closed,
    /// Lost the connection after a working session.
    Dropped,
}

enum Flow {
    Continue,
    /// Engine.IO handshake done; carries the liveness window it announced.
    Opened(Option<Duration>),
    NamespaceReady,
    Ended,
}

/// Socket.IO event channel over a WebSocket.
///
/// A driver task owns the socket. It replays `setup` (and the last
/// `join chat`) after every reconnect, so subscribers never see the drop.
pub struct SocketChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    registry: SharedRegistry,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    _driver: JoinHandle<()>,
}

impl SocketChannel {
    /// Connect, announce `user_id` with `setup`, and wait for `connected`.
    pub async fn connect(options: SocketOptions) -> Result<Self, TransportError> {
        let registry: SharedRegistry = Default::default();
        let ready = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handshake_timeout = options.handshake_timeout;

        let driver = SocketDriver {
            options,
            registry: Arc::clone(&registry),
            ready: Arc::clone(&ready),
            closed: Arc::clone(&closed),
            outbound: outbound_rx,
            ready_signal: Some(ready_tx),
            joined: None,
        };
        let handle = tokio::spawn(driver.run());

        match tokio::time::timeout(handshake_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                log::info!("Realtime channel ready");
                Ok(Self {
                    outbound: outbound_tx,
                    registry,
                    ready,
                    closed,
                    _driver: handle,
                })
            }
            Ok(Ok(Err(err))) => {
                handle.abort();
                Err(err)
            }
            Ok(Err(_)) => {
                handle.abort();
                Err(TransportError::Closed)
            }
            Err(_) => {
                handle.abort();
                Err(TransportError::HandshakeTimeout(handshake_timeout))
            }
        }
    }
}

impl EventChannel for SocketChannel {
    fn send(&self, event: &str, payload: Value) {
        let outbound = Outbound::Event {
            name: event.to_string(),
            payload,
        };
        if self.outbound.send(outbound).is_err() {
            log::debug!("Channel closed; dropping `{event}`");
        }
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
        self.ready.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
        self.ready.store(false, Ordering::SeqCst);
        log::info!("Realtime channel closed");
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        // The driver exits on its own once it has flushed the close frame.
        self.close();
    }
}

struct SocketDriver {
    options: SocketOptions,
    registry: SharedRegistry,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    ready_signal: Option<oneshot::Sender<Result<(), TransportError>>>,
    joined: Option<Value>,
}

impl SocketDriver {
    async fn run(mut self) {
        let mut delay = self.options.reconnect_delay;

        loop {
            match self.session().await {
                Ok(SessionEnd::Closed) => break,
                Ok(SessionEnd::Dropped) => {
                    log::warn!("Realtime connection dropped");
                    delay = self.options.reconnect_delay;
                }
                Err(err) => {
                    if let Some(signal) = self.ready_signal.take() {
                        let _ = signal.send(Err(err));
                        return;
                    }
                    log::warn!("Realtime connection failed: {err}");
                }
            }

            self.ready.store(false, Ordering::SeqCst);
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            log::info!("Reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            delay = (delay * 2).min(self.options.max_reconnect_delay);
        }

        self.ready.store(false, Ordering::SeqCst);
        log::debug!("Realtime driver stopped");
    }

    async fn session(&mut self) -> Result<SessionEnd, TransportError> {
        let endpoint = socket_endpoint(&self.options.server_url);
        log::info!("Connecting to {endpoint}");
        let (stream, _) = connect_async(endpoint.as_str()).await?;
        let (mut write, mut read) = stream.split();
        let mut namespace_ready = false;

        // A half-open socket never yields another frame, so silence is the only signal.
        let mut window = Some(self.options.handshake_timeout);
        let silence = tokio::time::sleep(self.options.handshake_timeout);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                outbound = self.outbound.recv(), if namespace_ready => {
                    match outbound {
                        Some(Outbound::Event { name, payload }) => {
                            if name == protocol::JOIN_CHAT {
                                self.joined = Some(payload.clone());
                            }
                            send_frame(&mut write, protocol::encode_event(&name, &payload)).await?;
                        }
                        Some(Outbound::Close) | None => {
                            let _ = send_frame(&mut write, protocol::DISCONNECT_FRAME.to_string()).await;
                            let _ = write.close().await;
                            return Ok(SessionEnd::Closed);
                        }
                    }
                }
                frame = read.next() => {
                    if let Some(window) = window {
                        silence.as_mut().reset(Instant::now() + window);
                    }
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match self.handle_frame(text.as_str(), &mut write).await? {
                                Flow::Continue => {}
                                Flow::Opened(liveness) => {
                                    window = liveness;
                                    if let Some(window) = window {
                                        silence.as_mut().reset(Instant::now() + window);
                                    }
                                }
                                Flow::NamespaceReady => namespace_ready = true,
                                Flow::Ended => return Ok(SessionEnd::Dropped),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Dropped),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
                () = &mut silence, if window.is_some() => {
                    log::warn!(
                        "No frame from the server within {:?}; dropping the connection",
                        window.unwrap_or_default()
                    );
                    return Ok(SessionEnd::Dropped);
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: &str, write: &mut WsSink) -> Result<Flow, TransportError> {
        let packet = match protocol::decode(frame) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("Ignoring undecodable frame: {err}");
                return Ok(Flow::Continue);
            }
        };

        match packet {
            Packet::Open(info) => {
                log::debug!("Engine.IO session {} opened", info.sid);
                send_frame(write, protocol::CONNECT_FRAME.to_string()).await?;
                return Ok(Flow::Opened(info.liveness()));
            }
            Packet::Ping => send_frame(write, protocol::PONG_FRAME.to_string()).await?,
            Packet::Connect => {
                let setup = Value::String(self.options.user_id.clone());
                send_frame(write, protocol::encode_event(protocol::SETUP, &setup)).await?;
                if let Some(chat) = &self.joined {
                    log::info!("Rejoining chat {chat}");
                    send_frame(write, protocol::encode_event(protocol::JOIN_CHAT, chat)).await?;
                }
                return Ok(Flow::NamespaceReady);
            }
            Packet::Event { name, payload } => {
                if name == protocol::CONNECTED {
                    self.ready.store(true, Ordering::SeqCst);
                    if let Some(signal) = self.ready_signal.take() {
                        let _ = signal.send(Ok(()));
                    }
                }
                lock_registry(&self.registry).dispatch(&name, payload);
            }
            Packet::ConnectError(detail) => return Err(TransportError::Rejected(detail.to_string())),
            Packet::Close | Packet::Disconnect => return Ok(Flow::Ended),
            Packet::Pong | Packet::Noop | Packet::Ack => {}
        }
        Ok(Flow::Continue)
    }
}

async fn send_frame(write: &mut WsSink, frame: String) -> Result<(), TransportError> {
    write.send(WsMessage::Text(frame.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn options(url: &str) -> SocketOptions {
        SocketOptions {
            server_url: url.to_string(),
            user_id: "u1".into(),
            handshake_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(200),
        }
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn push(socket: &mut ServerSocket, frame: &str) {
        socket.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
    }

    async fn next_text(socket: &mut ServerSocket) -> String {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Server side of open → namespace connect → setup → connected.
    async fn handshake(socket: &mut ServerSocket, open: &str) {
        push(socket, open).await;
        assert_eq!(next_text(socket).await, protocol::CONNECT_FRAME);
        push(socket, r#"40{"sid":"n1"}"#).await;
        assert_eq!(next_text(socket).await, r#"42["setup","u1"]"#);
        push(socket, r#"42["connected"]"#).await;
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn endpoint_maps_http_schemes() {
        assert_eq!(
            socket_endpoint("http://localhost:5000/"),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_endpoint("https://chat.example.com"),
            "wss://chat.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_endpoint("ws://10.0.0.2:5000"),
            "ws://10.0.0.2:5000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[tokio::test]
    async fn connect_announces_user_and_dispatches_events() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            handshake(&mut socket, OPEN).await;
            let join = next_text(&mut socket).await;
            push(&mut socket, "2").await;
            let pong = next_text(&mut socket).await;
            push(&mut socket, r#"42["typing","c1"]"#).await;
            (join, pong, socket)
        });

        let mut channel = SocketChannel::connect(options(&url)).await.unwrap();
        assert!(channel.is_ready());

        let (typing_tx, mut typing_rx) = mpsc::unbounded_channel();
        channel.subscribe(
            protocol::TYPING,
            Box::new(move |payload: Value| {
                let _ = typing_tx.send(payload);
            }),
        );
        channel.send(protocol::JOIN_CHAT, json!("c1"));

        let (join, pong, _socket) = server.await.unwrap();
        assert_eq!(join, r#"42["join chat","c1"]"#);
        assert_eq!(pong, protocol::PONG_FRAME);

        let typed = tokio::time::timeout(Duration::from_secs(2), typing_rx.recv())
            .await
            .unwrap();
        assert_eq!(typed, Some(json!("c1")));
    }

    #[tokio::test]
    async fn connect_times_out_without_connected() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            push(&mut socket, OPEN).await;
            // Never answer the namespace connect.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let options = SocketOptions {
            handshake_timeout: Duration::from_millis(200),
            ..options(&url)
        };
        match SocketChannel::connect(options).await {
            Err(TransportError::HandshakeTimeout(waited)) => {
                assert_eq!(waited, Duration::from_millis(200))
            }
            Err(other) => panic!("expected handshake timeout, got {other}"),
            Ok(_) => panic!("expected handshake timeout, got a channel"),
        }
    }

    #[tokio::test]
    async fn connect_error_is_reported() {
        let (listener, url) = listen().await;
        tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            push(&mut socket, OPEN).await;
            next_text(&mut socket).await;
            push(&mut socket, r#"44{"message":"unauthorized"}"#).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        match SocketChannel::connect(options(&url)).await {
            Err(TransportError::Rejected(detail)) => assert!(detail.contains("unauthorized")),
            Err(other) => panic!("expected rejection, got {other}"),
            Ok(_) => panic!("expected rejection, got a channel"),
        }
    }

    #[tokio::test]
    async fn reconnect_replays_setup_join_and_buffered_events() {
        let (listener, url) = listen().await;
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            handshake(&mut first, OPEN).await;
            assert_eq!(next_text(&mut first).await, r#"42["join chat","c1"]"#);
            let _ = first.close(None).await;
            drop(first);
            let _ = dropped_tx.send(());

            let mut second = accept(&listener).await;
            handshake(&mut second, OPEN).await;
            let replayed = next_text(&mut second).await;
            let buffered = next_text(&mut second).await;
            (replayed, buffered, second)
        });

        let channel = SocketChannel::connect(options(&url)).await.unwrap();
        channel.send(protocol::JOIN_CHAT, json!("c1"));

        dropped_rx.await.unwrap();
        wait_until(|| !channel.is_ready()).await;
        channel.send(protocol::TYPING, json!("c1"));

        let (replayed, buffered, _second) = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed, r#"42["join chat","c1"]"#);
        assert_eq!(buffered, r#"42["typing","c1"]"#);
        wait_until(|| channel.is_ready()).await;
    }

    #[tokio::test]
    async fn silent_server_is_treated_as_lost() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            handshake(
                &mut first,
                r#"0{"sid":"s1","upgrades":[],"pingInterval":100,"pingTimeout":100}"#,
            )
            .await;
            // Keep the socket open but stop talking, like a half-open peer.
            let mut second = accept(&listener).await;
            handshake(&mut second, OPEN).await;
            (first, second)
        });

        let channel = SocketChannel::connect(options(&url)).await.unwrap();
        let reconnected = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(reconnected.is_ok(), "driver never reconnected");
        wait_until(|| channel.is_ready()).await;
    }
}
