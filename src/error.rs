//! NETCONF client error types.
//!
//! # Error Classification
//!
//! Errors split along the two directions of a session:
//!
//! - **Outbound path** (sending hello/rpc, encoding requests): always returned
//!   to the caller that initiated the action.
//! - **Inbound path** (the receive loop): logged and the offending message is
//!   dropped. A bad message never terminates the session.
//!
//! Protocol-level `<rpc-error>` elements are *not* errors in this sense. A
//! well-formed reply carrying them is returned as data through
//! [`RpcReply::errors`](crate::message::RpcReply::errors).

use std::time::Duration;

use thiserror::Error;

/// NETCONF client errors.
#[derive(Error, Debug)]
pub enum NetconfError {
    /// I/O failure on the underlying byte stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection (EOF on the read half).
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Message boundary framing was violated.
    #[error("Framing error: {0}")]
    Framing(String),

    /// An outbound message could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// An inbound message was recognized but could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Inbound payload matched neither a reply nor a notification.
    #[error("Unclassified message: {0}")]
    Classification(String),

    /// Operation not valid in the current session state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A notification stream is already active on this session.
    #[error(
        "there is already an active notification stream subscription; \
         a session can only support one notification stream at a time"
    )]
    SubscriptionConflict,

    /// The create-subscription request failed.
    #[error("Failed to create notification stream: {0}")]
    Subscription(String),

    /// A consumer is already registered under this correlation key.
    #[error("Key already registered: {0}")]
    KeyConflict(String),

    /// No reply arrived within the allowed time.
    #[error("Timed out after {0:?} waiting for reply")]
    Timeout(Duration),

    /// The session was closed; the outcome can no longer occur.
    #[error("Session closed")]
    Closed,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl NetconfError {
    /// Whether the transport can no longer produce or accept messages.
    pub fn is_terminal(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            Self::Closed | Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type alias for NETCONF operations
pub type Result<T> = std::result::Result<T, NetconfError>;

impl From<toml::de::Error> for NetconfError {
    fn from(err: toml::de::Error) -> Self {
        NetconfError::Config(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for NetconfError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        NetconfError::Decoding(format!("invalid attribute: {err}"))
    }
}
