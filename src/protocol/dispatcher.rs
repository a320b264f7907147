//! Event-correlation registry.
//!
//! Maps a correlation key (an rpc `message-id`, or the notification stream
//! handler key) to the consumer waiting for it. The receive loop hands every
//! decoded inbound message to [`Dispatcher::dispatch`], which routes it to
//! exactly one consumer.
//!
//! # Persistence
//!
//! | Class        | Used for       | After delivery         |
//! |--------------|----------------|------------------------|
//! | `SingleShot` | rpc replies    | removed (exactly once) |
//! | `Durable`    | notifications  | kept until `remove`    |
//!
//! The registry lock is only held to look up or mutate the map. Consumers
//! run after it is released, so a consumer may itself register or remove
//! keys without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{NetconfError, Result};
use crate::message::{Notification, RpcReply};

/// Consumer invoked with each delivered event, or with `Err(Closed)` when
/// the session ends before delivery.
pub type Callback = Arc<dyn Fn(Result<Event>) + Send + Sync>;

/// How long a registration lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Removed after the first delivery
    SingleShot,
    /// Delivered to until explicitly removed
    Durable,
}

/// Kind of inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `<rpc-reply>`
    Reply,
    /// `<notification>`
    Notification,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Reply to a request
    Reply(RpcReply),
    /// Server-pushed notification
    Notification(Notification),
}

impl EventPayload {
    /// Kind of this payload
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Reply(_) => EventKind::Reply,
            Self::Notification(_) => EventKind::Notification,
        }
    }

    /// Correlation key carried by the message
    pub fn key(&self) -> &str {
        match self {
            Self::Reply(reply) => &reply.message_id,
            Self::Notification(notification) => &notification.subscription_id,
        }
    }
}

/// An inbound message together with the key it was delivered under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    key: String,
    payload: EventPayload,
}

impl Event {
    /// Create an event
    pub fn new(key: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// Key the event was delivered under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Kind of the carried message
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The carried message
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// The reply, if this is a reply event
    pub fn rpc_reply(&self) -> Option<&RpcReply> {
        match &self.payload {
            EventPayload::Reply(reply) => Some(reply),
            EventPayload::Notification(_) => None,
        }
    }

    /// The notification, if this is a notification event
    pub fn notification(&self) -> Option<&Notification> {
        match &self.payload {
            EventPayload::Notification(notification) => Some(notification),
            EventPayload::Reply(_) => None,
        }
    }

    /// Take the reply out of a reply event
    pub fn into_reply(self) -> Result<RpcReply> {
        match self.payload {
            EventPayload::Reply(reply) => Ok(reply),
            EventPayload::Notification(_) => Err(NetconfError::Protocol(format!(
                "Expected rpc-reply for {}, got notification",
                self.key
            ))),
        }
    }
}

struct Registration {
    consumer: Callback,
    persistence: Persistence,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Registration>,
    /// Set by `close`; no further registrations accepted
    closed: bool,
}

/// Correlation key → pending consumer
pub struct Dispatcher {
    registry: Mutex<Registry>,
    /// Number of single-shot registrations
    pending: watch::Sender<usize>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            registry: Mutex::new(Registry::default()),
            pending,
        }
    }

    /// Associate `consumer` with `key`.
    ///
    /// Fails with [`NetconfError::KeyConflict`] if `key` is already
    /// registered; the existing registration is left in place. Fails with
    /// [`NetconfError::Closed`] once the dispatcher has been closed.
    pub fn register<F>(&self, key: impl Into<String>, persistence: Persistence, consumer: F) -> Result<()>
    where
        F: Fn(Result<Event>) + Send + Sync + 'static,
    {
        let key = key.into();
        let mut registry = self.lock();
        if registry.closed {
            return Err(NetconfError::Closed);
        }
        if registry.entries.contains_key(&key) {
            return Err(NetconfError::KeyConflict(key));
        }

        tracing::trace!("Registered {:?} consumer for {}", persistence, key);
        registry.entries.insert(
            key,
            Registration {
                consumer: Arc::new(consumer),
                persistence,
            },
        );
        self.update_pending(&registry);
        Ok(())
    }

    /// Deliver `payload` to the consumer registered under `key`.
    ///
    /// Single-shot registrations are removed before the consumer runs.
    /// Returns `false` (and drops the event) when nothing is registered.
    pub fn dispatch(&self, key: &str, payload: EventPayload) -> bool {
        let consumer = {
            let mut registry = self.lock();
            let persistence = match registry.entries.get(key) {
                None => return false,
                Some(registration) => registration.persistence,
            };
            let consumer = match persistence {
                Persistence::Durable => registry.entries.get(key).map(|r| Arc::clone(&r.consumer)),
                Persistence::SingleShot => registry.entries.remove(key).map(|r| r.consumer),
            };
            self.update_pending(&registry);
            match consumer {
                Some(consumer) => consumer,
                None => return false,
            }
        };

        invoke(key, &consumer, Ok(Event::new(key, payload)));
        true
    }

    /// Delete the registration under `key`, if any
    pub fn remove(&self, key: &str) -> bool {
        let mut registry = self.lock();
        let removed = registry.entries.remove(key).is_some();
        if removed {
            tracing::trace!("Removed consumer for {}", key);
            self.update_pending(&registry);
        }
        removed
    }

    /// Whether a consumer is registered under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of registrations of any class
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of outstanding single-shot registrations
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no single-shot registrations remain.
    ///
    /// Durable registrations are not counted, so a live notification
    /// stream never keeps this waiting.
    pub async fn wait_for_pending(&self) {
        let mut pending = self.pending.subscribe();
        loop {
            let outstanding = *pending.borrow_and_update();
            if outstanding == 0 {
                return;
            }
            if pending.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse further registrations and remove every existing one, invoking
    /// each consumer once with the error produced by `error`. Returns how
    /// many consumers were failed; a second call fails nobody.
    pub fn close<E>(&self, error: E) -> usize
    where
        E: Fn() -> NetconfError,
    {
        let drained: Vec<(String, Registration)> = {
            let mut registry = self.lock();
            registry.closed = true;
            let drained = registry.entries.drain().collect();
            self.update_pending(&registry);
            drained
        };

        for (key, registration) in &drained {
            invoke(key, &registration.consumer, Err(error()));
        }
        drained.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_pending(&self, registry: &Registry) {
        let count = registry
            .entries
            .values()
            .filter(|r| r.persistence == Persistence::SingleShot)
            .count();
        self.pending.send_if_modified(|pending| {
            let changed = *pending != count;
            *pending = count;
            changed
        });
    }
}

/// Run a consumer, containing any panic so one faulty consumer cannot take
/// down the receive loop.
fn invoke(key: &str, consumer: &Callback, event: Result<Event>) {
    if catch_unwind(AssertUnwindSafe(|| consumer(event))).is_err() {
        tracing::error!("Consumer for {} panicked", key);
    }
}

/// Consumer that logs the reply for `message_id`.
pub fn log_reply_callback(message_id: impl Into<String>) -> impl Fn(Result<Event>) + Send + Sync + 'static {
    let message_id = message_id.into();
    move |event| match event {
        Ok(event) => match event.rpc_reply() {
            Some(reply) if reply.has_errors() => {
                tracing::warn!("RPC {} failed: {}", message_id, reply.error_summary());
            },
            Some(reply) => {
                tracing::info!("Successfully executed RPC {}", message_id);
                tracing::debug!("{}", reply.raw);
            },
            None => tracing::warn!("Failed to execute RPC {}: no reply", message_id),
        },
        Err(e) => tracing::warn!("Failed to execute RPC {}: {}", message_id, e),
    }
}

/// Consumer that logs each notification.
pub fn log_notification_callback() -> impl Fn(Result<Event>) + Send + Sync + 'static {
    |event| match event {
        Ok(event) => {
            if let Some(notification) = event.notification() {
                tracing::info!("Received notification on {}", event.key());
                tracing::debug!("{}", notification.raw);
            }
        },
        Err(e) => tracing::info!("Notification stream ended: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NOTIFICATION_STREAM_HANDLER;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn reply(id: &str) -> EventPayload {
        EventPayload::Reply(RpcReply {
            message_id: id.to_string(),
            ok: true,
            ..Default::default()
        })
    }

    fn notification() -> EventPayload {
        EventPayload::Notification(Notification {
            subscription_id: NOTIFICATION_STREAM_HANDLER.to_string(),
            event_time: None,
            raw: "<notification/>".to_string(),
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Result<Event>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |event: Result<Event>| {
            assert!(event.is_ok());
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_single_shot_delivered_once() {
        let dispatcher = Dispatcher::new();
        let (count, consumer) = counter();
        dispatcher.register("1", Persistence::SingleShot, consumer).unwrap();
        assert_eq!(dispatcher.pending_count(), 1);

        assert!(dispatcher.dispatch("1", reply("1")));
        assert!(!dispatcher.dispatch("1", reply("1")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.contains("1"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_durable_delivered_until_removed() {
        let dispatcher = Dispatcher::new();
        let (count, consumer) = counter();
        dispatcher
            .register(NOTIFICATION_STREAM_HANDLER, Persistence::Durable, consumer)
            .unwrap();
        assert_eq!(dispatcher.pending_count(), 0);

        for _ in 0..3 {
            assert!(dispatcher.dispatch(NOTIFICATION_STREAM_HANDLER, notification()));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(dispatcher.remove(NOTIFICATION_STREAM_HANDLER));
        assert!(!dispatcher.dispatch(NOTIFICATION_STREAM_HANDLER, notification()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_routes_by_key() {
        let dispatcher = Dispatcher::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        for id in ["100", "101", "102"] {
            let delivered = Arc::clone(&delivered);
            let expected = id.to_string();
            dispatcher
                .register(id, Persistence::SingleShot, move |event: Result<Event>| {
                    let event = event.unwrap();
                    delivered
                        .lock()
                        .unwrap()
                        .push((expected.clone(), event.rpc_reply().unwrap().message_id.clone()));
                })
                .unwrap();
        }

        dispatcher.dispatch("101", reply("101"));
        assert_eq!(*delivered.lock().unwrap(), vec![("101".to_string(), "101".to_string())]);
        assert!(dispatcher.contains("100"));
        assert!(dispatcher.contains("102"));
        assert_eq!(dispatcher.pending_count(), 2);
    }

    #[test]
    fn test_register_rejects_key_in_use() {
        let dispatcher = Dispatcher::new();
        let (first, consumer) = counter();
        dispatcher.register("7", Persistence::SingleShot, consumer).unwrap();

        let (second, consumer) = counter();
        let result = dispatcher.register("7", Persistence::SingleShot, consumer);
        assert!(matches!(result, Err(NetconfError::KeyConflict(key)) if key == "7"));

        dispatcher.dispatch("7", reply("7"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_key_is_dropped() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.dispatch("nobody", reply("nobody")));
        assert!(!dispatcher.remove("nobody"));
    }

    #[test]
    fn test_consumer_may_reenter_dispatcher() {
        let dispatcher = Arc::new(Dispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher
            .register("1", Persistence::SingleShot, move |_| {
                inner.register("2", Persistence::SingleShot, |_| {}).unwrap();
            })
            .unwrap();

        dispatcher.dispatch("1", reply("1"));
        assert!(dispatcher.contains("2"));
    }

    #[test]
    fn test_panicking_consumer_is_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register("1", Persistence::SingleShot, |_| panic!("boom"))
            .unwrap();
        assert!(dispatcher.dispatch("1", reply("1")));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_close_fails_every_consumer() {
        let dispatcher = Dispatcher::new();
        let failures = Arc::new(AtomicUsize::new(0));
        for (key, persistence) in [
            ("1", Persistence::SingleShot),
            ("2", Persistence::SingleShot),
            (NOTIFICATION_STREAM_HANDLER, Persistence::Durable),
        ] {
            let failures = Arc::clone(&failures);
            dispatcher
                .register(key, persistence, move |event: Result<Event>| {
                    assert!(matches!(event, Err(NetconfError::Closed)));
                    failures.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        assert_eq!(dispatcher.close(|| NetconfError::Closed), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 3);
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.pending_count(), 0);

        assert_eq!(dispatcher.close(|| NetconfError::Closed), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_register_after_close_rejected() {
        let dispatcher = Dispatcher::new();
        dispatcher.close(|| NetconfError::Closed);
        assert!(dispatcher.is_closed());

        let result = dispatcher.register("1", Persistence::SingleShot, |_| {});
        assert!(matches!(result, Err(NetconfError::Closed)));
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_pending_ignores_durable() {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher
            .register(NOTIFICATION_STREAM_HANDLER, Persistence::Durable, |_| {})
            .unwrap();
        dispatcher.register("1", Persistence::SingleShot, |_| {}).unwrap();

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.wait_for_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        dispatcher.dispatch("1", reply("1"));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_for_pending did not return")
            .unwrap();
        assert!(dispatcher.contains(NOTIFICATION_STREAM_HANDLER));
    }

    #[test]
    fn test_event_accessors() {
        let event = Event::new("5", reply("5"));
        assert_eq!(event.key(), "5");
        assert_eq!(event.kind(), EventKind::Reply);
        assert!(event.notification().is_none());
        assert_eq!(event.clone().into_reply().unwrap().message_id, "5");

        let event = Event::new(NOTIFICATION_STREAM_HANDLER, notification());
        assert_eq!(event.kind(), EventKind::Notification);
        assert!(event.into_reply().is_err());
    }
}
