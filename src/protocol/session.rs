//! Client session lifecycle.
//!
//! A [`Session`] is built from a connected [`Transport`]: the constructor
//! reads the server hello, [`Session::send_hello`] answers it, settles the
//! framing version and starts the receive loop. From then on requests can be
//! issued from any number of tasks; replies and notifications are routed to
//! their consumers through the session's [`Dispatcher`].
//!
//! The receive loop is two tasks joined by a bounded channel. The reader
//! owns the transport's read side and classifies messages; the deliverer runs
//! consumers. A slow consumer delays reading only once
//! `delivery_queue_size` messages are waiting, which pushes back on the peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::dispatcher::{Dispatcher, Event, EventPayload, Persistence};
use crate::config::Config;
use crate::error::{NetconfError, Result};
use crate::message::{
    Hello, Notification, Rpc, RpcMethod, RpcReply, NOTIFICATION_MARKER, NOTIFICATION_STREAM_HANDLER,
    RPC_REPLY_MARKER,
};
use crate::transport::{FramingVersion, Transport};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Server hello received, client hello not yet sent
    Negotiated,
    /// Hello exchanged, receive loop running
    Listening,
    /// Session closed
    Closed,
}

/// Inbound message ready for delivery
type Inbound = (String, EventPayload);

/// First pause after a non-terminal receive failure
const RECEIVE_RETRY_BASE: Duration = Duration::from_millis(10);

/// Longest pause between receive retries
const RECEIVE_RETRY_MAX: Duration = Duration::from_secs(1);

/// State shared between the session handles and the receive loop tasks.
struct Shared {
    transport: Arc<dyn Transport>,
    session_id: u64,
    server_hello: Hello,
    config: Config,
    dispatcher: Dispatcher,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    /// Set by the one caller allowed to send the client hello
    hello_sent: AtomicBool,
    subscription_active: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// Waiter for the next raw message, bypassing the dispatcher
    direct: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn direct(&self) -> MutexGuard<'_, Option<oneshot::Sender<Bytes>>> {
        self.direct.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Closed` and fail everything still waiting. Idempotent.
    fn finish(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state() = SessionState::Closed;
        self.shutdown.send_replace(true);
        self.subscription_active.store(false, Ordering::SeqCst);
        drop(self.direct().take());

        let failed = self.dispatcher.close(|| NetconfError::Closed);
        if failed > 0 {
            tracing::debug!("Session {}: failed {} waiting consumers", self.session_id, failed);
        }
    }
}

struct Handle {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Handle {
    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
        self.shared.finish();
    }
}

/// NETCONF client session.
///
/// Cloning yields another handle to the same session. The session is torn
/// down by [`close`](Self::close), by the peer disconnecting, or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct Session {
    handle: Arc<Handle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .field("transport", &self.shared().transport.name())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Read the server hello from `transport` using default configuration.
    pub async fn new<T>(transport: T) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::with_config(transport, Config::default()).await
    }

    /// Read the server hello from `transport`.
    ///
    /// Fails if nothing arrives within the rpc timeout, if the message is not
    /// a hello, or if the hello carries no session-id. The transport is closed
    /// on failure.
    pub async fn with_config<T>(transport: T, config: Config) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        transport.set_framing(FramingVersion::V1_0);

        let (session_id, hello) = match read_server_hello(transport.as_ref(), config.session.rpc_timeout()).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::debug!("Failed to close transport: {}", close_err);
                }
                return Err(e);
            },
        };

        tracing::info!(
            "Session {} negotiated over {} ({} server capabilities)",
            session_id,
            transport.name(),
            hello.capabilities.len()
        );

        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            transport,
            session_id,
            server_hello: hello,
            config,
            dispatcher: Dispatcher::new(),
            state: Mutex::new(SessionState::Negotiated),
            closed: AtomicBool::new(false),
            hello_sent: AtomicBool::new(false),
            subscription_active: AtomicBool::new(false),
            shutdown,
            direct: Mutex::new(None),
        });

        Ok(Self {
            handle: Arc::new(Handle {
                shared,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Session identifier assigned by the server
    pub fn session_id(&self) -> u64 {
        self.shared().session_id
    }

    /// Capabilities advertised by the server
    pub fn capabilities(&self) -> &[String] {
        &self.shared().server_hello.capabilities
    }

    /// Whether the server advertised `capability`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c == capability)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.shared().state()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.shared().is_closed()
    }

    /// Framing version currently in use
    pub fn framing(&self) -> FramingVersion {
        self.shared().transport.framing()
    }

    /// Session configuration
    pub fn config(&self) -> &Config {
        &self.shared().config
    }

    /// Correlation registry used by this session
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared().dispatcher
    }

    /// Whether a notification stream is active
    pub fn has_notification_stream(&self) -> bool {
        self.shared().subscription_active.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(NetconfError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send the client hello and start the receive loop.
    ///
    /// The hello always goes out with 1.0 framing. Afterwards framing
    /// switches to 1.1 if the server hello advertised a base:1.1 capability.
    /// Only one call ever succeeds; concurrent or later calls fail with
    /// [`NetconfError::Protocol`]. A failed send releases the claim.
    pub async fn send_hello<I, S>(&self, capabilities: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let state = self.state();
        if state != SessionState::Negotiated {
            return Err(NetconfError::Protocol(format!("Cannot send hello in state {:?}", state)));
        }

        let shared = self.shared();
        if shared
            .hello_sent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NetconfError::Protocol("Hello already sent".to_string()));
        }

        let hello = Hello::new(capabilities);
        shared.transport.set_framing(FramingVersion::V1_0);
        if let Err(e) = shared.transport.send(&hello.to_xml()).await {
            shared.hello_sent.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let framing = if shared.server_hello.advertises_base_1_1() {
            FramingVersion::V1_1
        } else {
            FramingVersion::V1_0
        };
        shared.transport.set_framing(framing);
        tracing::info!("Session {}: hello sent, using {} framing", shared.session_id, framing);

        self.start_listening();
        Ok(())
    }

    /// Send the client hello with the configured capabilities.
    pub async fn send_default_hello(&self) -> Result<()> {
        let capabilities = self.config().session.capabilities.clone();
        self.send_hello(capabilities).await
    }

    fn start_listening(&self) {
        let (events_tx, events_rx) = mpsc::channel(self.config().session.delivery_queue_size());
        let reader = tokio::spawn(read_loop(Arc::clone(&self.handle.shared), events_tx));
        let deliverer = tokio::spawn(deliver_loop(Arc::clone(&self.handle.shared), events_rx));

        let mut state = self.shared().state();
        if *state == SessionState::Negotiated {
            *state = SessionState::Listening;
        }
        drop(state);
        self.handle.tasks().extend([reader, deliverer]);
    }

    /// Send `rpc` and invoke `callback` with its reply.
    ///
    /// Returns once the request is written; the callback runs later on the
    /// delivery task, or with `Err(Closed)` if the session ends first.
    pub async fn async_rpc<R, F>(&self, rpc: &R, callback: F) -> Result<()>
    where
        R: RpcMethod + ?Sized,
        F: Fn(Result<Event>) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let request = rpc.to_xml()?;
        let message_id = rpc.message_id();

        self.dispatcher()
            .register(message_id, Persistence::SingleShot, callback)?;
        tracing::debug!("Session {}: sending rpc {}", self.session_id(), message_id);

        if let Err(e) = self.shared().transport.send(&request).await {
            self.dispatcher().remove(message_id);
            return Err(e);
        }
        Ok(())
    }

    /// Send `rpc` and wait up to `timeout` for its reply.
    pub async fn sync_rpc<R>(&self, rpc: &R, timeout: Duration) -> Result<RpcReply>
    where
        R: RpcMethod + ?Sized,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.async_rpc(rpc, move |event: Result<Event>| {
            let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(event.and_then(Event::into_reply));
            }
        })
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(NetconfError::Closed),
            Err(_) => {
                self.dispatcher().remove(rpc.message_id());
                tracing::warn!(
                    "Session {}: no reply to {} within {:?}",
                    self.session_id(),
                    rpc.message_id(),
                    timeout
                );
                Err(NetconfError::Timeout(timeout))
            },
        }
    }

    /// Send `rpc` and wait for its reply using the configured timeout.
    pub async fn rpc<R>(&self, rpc: &R) -> Result<RpcReply>
    where
        R: RpcMethod + ?Sized,
    {
        self.sync_rpc(rpc, self.config().session.rpc_timeout()).await
    }

    /// Send `rpc` and decode the next inbound message as its reply.
    ///
    /// Bypasses the dispatcher: whatever message arrives next is taken,
    /// regardless of its message-id. Only use this when no other request or
    /// notification stream is outstanding.
    pub async fn exec_rpc<R>(&self, rpc: &R) -> Result<RpcReply>
    where
        R: RpcMethod + ?Sized,
    {
        self.ensure_open()?;
        let request = rpc.to_xml()?;
        let shared = self.shared();

        let timeout = shared.config.session.rpc_timeout();
        if !shared.hello_sent.load(Ordering::SeqCst) {
            shared.transport.send(&request).await?;
            let raw = tokio::time::timeout(timeout, shared.transport.receive())
                .await
                .map_err(|_| NetconfError::Timeout(timeout))??;
            return RpcReply::from_xml(&raw);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut direct = shared.direct();
            if direct.is_some() {
                return Err(NetconfError::Protocol("Another exec_rpc is already waiting".to_string()));
            }
            *direct = Some(tx);
        }

        if let Err(e) = shared.transport.send(&request).await {
            shared.direct().take();
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(raw)) => RpcReply::from_xml(&raw),
            Ok(Err(_)) => Err(NetconfError::Closed),
            Err(_) => {
                shared.direct().take();
                Err(NetconfError::Timeout(timeout))
            },
        }
    }

    /// Subscribe to notifications; `callback` receives every one of them.
    ///
    /// Only one stream may be active per session. A second call fails with
    /// [`NetconfError::SubscriptionConflict`] and leaves the first stream
    /// untouched. If the subscription request fails or is answered with
    /// `<rpc-error>`, the registration is withdrawn before returning.
    pub async fn create_notification_stream<F>(
        &self,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
        stream: Option<&str>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(Result<Event>) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let shared = self.shared();
        if shared
            .subscription_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NetconfError::SubscriptionConflict);
        }

        if let Err(e) = shared
            .dispatcher
            .register(NOTIFICATION_STREAM_HANDLER, Persistence::Durable, callback)
        {
            shared.subscription_active.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let request = Rpc::create_subscription(stream.map(str::to_string), start_time, stop_time);
        let outcome = match self.rpc(&request).await {
            Ok(reply) if reply.has_errors() => Err(NetconfError::Subscription(reply.error_summary())),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            shared.dispatcher.remove(NOTIFICATION_STREAM_HANDLER);
            shared.subscription_active.store(false, Ordering::SeqCst);
            tracing::warn!("Session {}: subscription failed: {}", shared.session_id, e);
            return Err(e);
        }

        // Removed locally while the server was still answering
        if !shared.dispatcher.contains(NOTIFICATION_STREAM_HANDLER) {
            tracing::warn!("Session {}: notification stream removed during subscription", shared.session_id);
            return Err(NetconfError::Subscription(
                "Notification stream removed before the subscription was confirmed".to_string(),
            ));
        }

        tracing::info!(
            "Session {}: notification stream {} created",
            shared.session_id,
            stream.unwrap_or("NETCONF")
        );
        Ok(())
    }

    /// Stop delivering notifications. Returns whether a stream was active.
    ///
    /// This only drops the local registration; the server keeps sending until
    /// the session ends, and those notifications are discarded.
    pub fn remove_notification_stream(&self) -> bool {
        let shared = self.shared();
        let removed = shared.dispatcher.remove(NOTIFICATION_STREAM_HANDLER);
        shared.subscription_active.store(false, Ordering::SeqCst);
        removed
    }

    /// Wait until every outstanding reply has been delivered.
    pub async fn wait_for_pending(&self) {
        self.dispatcher().wait_for_pending().await;
    }

    /// Close the session.
    ///
    /// Stops the receive loop, closes the transport and fails every waiting
    /// consumer with [`NetconfError::Closed`]. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let shared = self.shared();
        if !shared.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Closing session {}", shared.session_id);
        }

        shared.shutdown.send_replace(true);
        let result = shared.transport.close().await;

        let tasks: Vec<_> = self.handle.tasks().drain(..).collect();
        let close_timeout = shared.config.session.close_timeout();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(close_timeout, task).await.is_err() {
                tracing::warn!(
                    "Session {}: receive loop did not stop within {:?}",
                    shared.session_id,
                    close_timeout
                );
                abort.abort();
            }
        }

        shared.finish();
        result
    }
}

async fn read_server_hello(transport: &dyn Transport, timeout: Duration) -> Result<(u64, Hello)> {
    let raw = tokio::time::timeout(timeout, transport.receive())
        .await
        .map_err(|_| NetconfError::Timeout(timeout))??;
    let hello = Hello::from_xml(&raw)?;
    match hello.session_id {
        Some(session_id) => Ok((session_id, hello)),
        None => Err(NetconfError::Protocol("Server hello carries no session-id".to_string())),
    }
}

/// Decide what an inbound message is and decode it.
pub(crate) fn classify(raw: &[u8]) -> Result<Inbound> {
    let text = String::from_utf8_lossy(raw);
    if text.contains(RPC_REPLY_MARKER) {
        let reply = RpcReply::from_xml(raw)?;
        Ok((reply.message_id.clone(), EventPayload::Reply(reply)))
    } else if text.contains(NOTIFICATION_MARKER) {
        let notification = Notification::from_xml(raw)?;
        Ok((notification.subscription_id.clone(), EventPayload::Notification(notification)))
    } else {
        let preview: String = text.chars().take(64).collect();
        Err(NetconfError::Classification(preview))
    }
}

/// Pause before the `failures`-th consecutive receive retry.
fn retry_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(10);
    RECEIVE_RETRY_BASE
        .saturating_mul(1 << exponent)
        .min(RECEIVE_RETRY_MAX)
}

/// Resolve once shutdown has been signalled.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop(shared: Arc<Shared>, events: mpsc::Sender<Inbound>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut failures: u32 = 0;
    tracing::debug!("Session {}: receive loop started", shared.session_id);

    loop {
        let received = tokio::select! {
            () = wait_shutdown(&mut shutdown) => break,
            received = shared.transport.receive() => received,
        };

        match received {
            Ok(raw) => {
                failures = 0;
                let waiter = shared.direct().take();
                if let Some(waiter) = waiter {
                    if waiter.send(raw).is_err() {
                        tracing::debug!("Session {}: exec_rpc waiter gone", shared.session_id);
                    }
                } else {
                    match classify(&raw) {
                        Ok(inbound) => {
                            let sent = tokio::select! {
                                () = wait_shutdown(&mut shutdown) => break,
                                sent = events.send(inbound) => sent,
                            };
                            if sent.is_err() {
                                break;
                            }
                        },
                        Err(NetconfError::Classification(preview)) => {
                            tracing::warn!("Session {}: unknown message {:?}", shared.session_id, preview);
                        },
                        Err(e) => {
                            tracing::warn!("Session {}: dropping message: {}", shared.session_id, e);
                        },
                    }
                }
            },
            Err(_) if shared.is_closed() => break,
            Err(e) if e.is_terminal() => {
                tracing::warn!("Session {}: connection lost: {}", shared.session_id, e);
                break;
            },
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == 1 {
                    tracing::warn!("Session {}: receive failed: {}", shared.session_id, e);
                } else {
                    tracing::debug!(
                        "Session {}: receive failed ({} in a row): {}",
                        shared.session_id,
                        failures,
                        e
                    );
                }
                tokio::select! {
                    () = wait_shutdown(&mut shutdown) => break,
                    () = tokio::time::sleep(retry_delay(failures)) => {},
                }
            },
        }

        if shared.is_closed() {
            break;
        }
    }

    tracing::debug!("Session {}: receive loop stopped", shared.session_id);
}

async fn deliver_loop(shared: Arc<Shared>, mut events: mpsc::Receiver<Inbound>) {
    while let Some((key, payload)) = events.recv().await {
        if !shared.dispatcher.dispatch(&key, payload) {
            tracing::debug!("Session {}: no consumer for {}, dropped", shared.session_id, key);
        }
        if shared.is_closed() {
            break;
        }
    }

    // Reader gone: either close() or the peer went away.
    shared.finish();
}
