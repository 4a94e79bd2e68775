pub mod api;
pub mod client;
pub mod protocol;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use client::{SocketChannel, SocketOptions};
pub use transport::{EventChannel, EventHandler, HandlerRegistry, MemoryChannel};
