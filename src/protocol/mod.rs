//! NETCONF session engine.
//!
//! Negotiates capabilities and framing, runs the background receive loop,
//! and correlates every inbound reply or notification with the caller that
//! is waiting for it.
//!
//! # Protocol Overview
//!
//! ## Message Flow
//!
//! ```text
//! Client                                  Server
//!    |                                      |
//!    |<------ <hello> (session-id) ---------|  Session::new
//!    |------- <hello> (capabilities) ------>|  send_hello, always 1.0 framing
//!    |                                      |  switch to 1.1 if advertised
//!    |======= <rpc message-id="1"> ========>|
//!    |======= <rpc message-id="2"> ========>|  any number in flight
//!    |<====== <rpc-reply message-id="2"> ===|  replies in any order
//!    |<====== <rpc-reply message-id="1"> ===|
//!    |                                      |
//!    |------- <create-subscription> ------->|
//!    |<------ <notification> ---------------|  repeated until close
//!    |                                      |
//!    |------- close ------------------------|
//! ```
//!
//! ## State Machine
//!
//! | State        | Description                        | Valid Transitions   |
//! |--------------|------------------------------------|---------------------|
//! | `Negotiated` | Server hello read, session-id known | → Listening, Closed |
//! | `Listening`  | Hello exchanged, loop running      | → Closed            |
//! | `Closed`     | Loop stopped, waiters failed       | (terminal)          |
//!
//! ## Correlation
//!
//! | Inbound          | Key                            | Registration |
//! |------------------|--------------------------------|--------------|
//! | `<rpc-reply>`    | its `message-id`               | single-shot  |
//! | `<notification>` | `DEFAULT_NOTIFICATION_STREAM`  | durable      |
//!
//! Messages with no registered consumer are dropped. Messages that cannot
//! be classified or decoded are logged and dropped; the loop keeps running.
//!
//! Classification is a substring match on the unprefixed markers
//! `<rpc-reply` and `<notification`. A reply whose root element carries a
//! namespace prefix (`<nc:rpc-reply>`) matches neither and is dropped as
//! unclassified, even though [`RpcReply::from_xml`] would accept it.
//!
//! [`RpcReply::from_xml`]: crate::message::RpcReply::from_xml
//!
//! # Usage
//!
//! ```rust,ignore
//! use netconf::protocol::{Session, log_reply_callback};
//! use netconf::message::{Datastore, Rpc, RpcMethod};
//! use netconf::transport::TcpTransport;
//!
//! let transport = TcpTransport::connect_tcp("192.0.2.1:830".parse()?).await?;
//! let session = Session::new(transport).await?;
//! session.send_default_hello().await?;
//!
//! let reply = session.rpc(&Rpc::get_config(Datastore::Running, None)).await?;
//!
//! let lock = Rpc::lock(Datastore::Candidate);
//! let id = lock.message_id().to_string();
//! session.async_rpc(&lock, log_reply_callback(id)).await?;
//! session.wait_for_pending().await;
//!
//! session.close().await?;
//! ```

mod dispatcher;
mod session;

pub use dispatcher::{
    log_notification_callback, log_reply_callback, Callback, Dispatcher, Event, EventKind, EventPayload,
    Persistence,
};
pub use session::{Session, SessionState};
