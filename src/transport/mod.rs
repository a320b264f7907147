//! Transport layer abstraction for NETCONF sessions.
//!
//! A transport moves whole messages over a reliable, ordered, full-duplex
//! byte stream (SSH subsystem, TLS, plain TCP in labs). It owns message
//! boundary framing and can switch framing mid-session:
//!
//! | Version | Framing                                   |
//! |---------|-------------------------------------------|
//! | 1.0     | message terminated by `]]>]]>`            |
//! | 1.1     | `\n#<len>\n<data>` chunks, ended by `\n##\n` |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                Session                   │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ Arc<dyn Transport>
//!                    ▼
//!          ┌──────────────────┐
//!          │ StreamTransport  │ ── FrameCodec
//!          │ (AsyncRead/Write)│
//!          └──────────────────┘
//!                    │
//!          TcpStream / duplex / SSH channel
//! ```

mod framing;
mod stream;
mod tcp;

pub use framing::{FrameCodec, END_OF_CHUNKS, END_OF_MESSAGE, MAX_CHUNK_SIZE};
pub use stream::StreamTransport;
pub use tcp::TcpTransport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Message framing version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramingVersion {
    /// End-of-message delimiter (default until negotiated otherwise)
    #[default]
    V1_0,
    /// Chunked, length-prefixed segments
    V1_1,
}

impl FramingVersion {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::V1_0 => 0,
            Self::V1_1 => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::V1_1
        } else {
            Self::V1_0
        }
    }
}

impl std::fmt::Display for FramingVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FramingVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().trim_start_matches('v') {
            "1.0" | "1_0" => Ok(Self::V1_0),
            "1.1" | "1_1" => Ok(Self::V1_1),
            _ => Err(format!("Unknown framing version: {}", s)),
        }
    }
}

/// Message transport consumed by a session.
///
/// `send` may be called from several tasks at once; implementations must
/// keep concurrent writes from interleaving. `receive` is only ever called
/// by one task at a time. `close` must be idempotent and must make any
/// pending or future `receive` fail.
pub trait Transport: Send + Sync {
    /// Frame and write one message.
    fn send<'a>(&'a self, message: &'a [u8]) -> TransportFuture<'a, ()>;

    /// Wait for and return the next complete message.
    fn receive(&self) -> TransportFuture<'_, Bytes>;

    /// Switch the framing used by subsequent sends and receives.
    fn set_framing(&self, version: FramingVersion);

    /// Current framing version.
    fn framing(&self) -> FramingVersion;

    /// Close the connection.
    fn close(&self) -> TransportFuture<'_, ()>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}
