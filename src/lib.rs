//! # cubesocket - RFC 6455 WebSockets over tokio
//!
//! A from-scratch WebSocket implementation: the frame codec, the opening
//! handshake (client and server halves), and an observer-driven
//! [`Connection`] whose receive task reassembles fragmented messages and
//! dispatches open, message, ping, pong and close events.
//!
//! ## Features
//!
//! - **Bit-exact framing** with all three length encodings and masking
//! - **Client handshake** with redirect following and accept-key checks
//! - **[`Listener`]** that matches request paths against a regex and runs
//!   one task per connection
//! - **wss://** through rustls (feature `tls-rustls`, on by default)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cubesocket::{ClientBuilder, Listener, ListenerConfig, Message};
//!
//! let listener = Listener::bind(ListenerConfig::new(9001)).await?;
//! listener.on_connection(|conn| {
//!     conn.on_message(|conn, msg| {
//!         let (conn, msg) = (conn.clone(), msg.clone());
//!         tokio::spawn(async move { conn.send(&msg).await });
//!     });
//! });
//!
//! let client = ClientBuilder::new("ws://127.0.0.1:9001/")?
//!     .on_message(|_, msg| println!("echo: {:?}", msg))
//!     .connect()
//!     .await?;
//! client.send_text("hello").await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod protocol;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::{ClientBuilder, connect};
pub use config::{Config, Limits, ListenerConfig};
pub use connection::{
    CloseObserver, Connection, ConnectionObserver, ConnectionState, Io, MessageObserver,
    OpenObserver, PingObserver, PongObserver, Role,
};
pub use error::{Error, Result};
pub use listener::Listener;
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{Frame, OpCode, WS_GUID, WsUri, compute_accept_key};
