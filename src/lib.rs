//! # NETCONF Client - Session Engine
//!
//! Asynchronous NETCONF (RFC 6241) client session over any reliable byte
//! stream, with hello negotiation, framing-version switching, concurrent
//! request multiplexing and notification subscriptions (RFC 5277).
//!
//! ## Features
//!
//! - **Hello exchange**: server session-id and capabilities captured on connect
//! - **Framing switch**: end-of-message (1.0) or chunked (1.1) framing,
//!   chosen from the server's advertised capabilities
//! - **Multiplexing**: any number of requests in flight, replies matched by
//!   `message-id` regardless of arrival order
//! - **Notifications**: one durable subscription per session
//! - **Resilient receive loop**: malformed input is logged and dropped
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//!  caller tasks                  Session                       device
//!      |                            |                             |
//!      |-- sync_rpc / async_rpc --->|--- <rpc> ------------------>|
//!      |                            |                             |
//!      |                     [reader task] <--- <rpc-reply> ------|
//!      |                            |    <--- <notification> -----|
//!      |                     classify + decode                    |
//!      |                            |                             |
//!      |                    [delivery task]                       |
//!      |<----- consumer(Event) -----|  Dispatcher lookup by key   |
//! ```
//!
//! ### Message Types
//!
//! | Element            | Direction      | Purpose                              |
//! |--------------------|----------------|--------------------------------------|
//! | `<hello>`          | Bidirectional  | Capability exchange, session-id      |
//! | `<rpc>`            | Client→Server  | Operation request with `message-id`  |
//! | `<rpc-reply>`      | Server→Client  | `<ok/>`, `<data>` or `<rpc-error>`   |
//! | `<notification>`   | Server→Client  | Event on a subscribed stream         |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netconf::{Config, Rpc, Session, TcpTransport};
//! use netconf::message::Datastore;
//!
//! let config = Config::load()?;
//! let transport = TcpTransport::connect_tcp_with_config(addr, &config.transport).await?;
//! let session = Session::with_config(transport, config).await?;
//! session.send_default_hello().await?;
//!
//! let reply = session.rpc(&Rpc::get_config(Datastore::Running, None)).await?;
//! if reply.has_errors() {
//!     eprintln!("{}", reply.error_summary());
//! }
//!
//! session
//!     .create_notification_stream(None, None, None, netconf::log_notification_callback())
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Session lifecycle, receive loop and event correlation
//! - [`message`]: Hello, rpc, rpc-reply and notification codecs
//! - [`transport`]: Transport trait, framing codec and stream transports
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use error::{NetconfError, Result};
pub use message::{Hello, Notification, Operation, Rpc, RpcError, RpcMethod, RpcReply};
pub use protocol::{
    log_notification_callback, log_reply_callback, Dispatcher, Event, EventKind, EventPayload, Persistence,
    Session, SessionState,
};
pub use transport::{FramingVersion, StreamTransport, TcpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
