// src/mqtt/session.rs
//
// Session manager: one logical broker connection shared by every feature
// (driver chat, device reset commands, trip broadcast).
//
// State machine:
//
//   Disconnected --connect()--> Connecting --ok--> Connected
//        ^                          |                  |
//        +---------- error ---------+                  |
//        +--- disconnect() / reset() / transport offline
//
// The handler table outlives connections. Entries are `Pending` while no
// live subscribe request has been issued and `Active` once one has; every
// successful connect re-issues a subscribe for each entry.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

use super::transport::{Connection, EventReceiver, Transport, TransportEvent};
use crate::error::{SessionError, TransportError};

/// Callback for inbound messages, invoked with the payload as text
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Registered, waiting for the next successful connect
    Pending,
    /// Live subscribe request issued on the current connection
    Active,
}

struct Subscription {
    handler: MessageHandler,
    state: SubscriptionState,
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), SessionError>>>;

struct SessionState {
    status: ConnectionStatus,
    connection: Option<Arc<dyn Connection>>,
    /// The single in-flight connection attempt, if any
    pending: Option<ConnectAttempt>,
    subscriptions: HashMap<String, Subscription>,
    /// Bumped on every attempt and teardown; stale attempts and dispatch
    /// loops compare against it and stand down
    generation: u64,
    /// Set by connect(), cleared by disconnect()/reset()
    wants_connection: bool,
    /// Lease holders and how many leases each holds
    holders: HashMap<String, usize>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Shared handle to one logical pub/sub session. Cloning is cheap; all clones
/// drive the same connection and handler table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                transport: Arc::new(transport),
                state: Mutex::new(SessionState {
                    status: ConnectionStatus::Disconnected,
                    connection: None,
                    pending: None,
                    subscriptions: HashMap::new(),
                    generation: 0,
                    wants_connection: false,
                    holders: HashMap::new(),
                }),
                status_tx,
            }),
        }
    }

    /// Connect, or join the attempt already in flight.
    ///
    /// The attempt runs on its own task: dropping the returned future does
    /// not cancel it. Every concurrent caller observes the same outcome.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let attempt = {
            let mut state = self.inner.lock();
            state.wants_connection = true;

            if state.status == ConnectionStatus::Connected {
                return Ok(());
            }

            match state.pending.clone() {
                Some(attempt) => attempt,
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    self.inner.set_status(&mut state, ConnectionStatus::Connecting);

                    let task = tokio::spawn(self.inner.clone().establish(generation));
                    let inner = self.inner.clone();
                    let attempt = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                let mut state = inner.lock();
                                if state.generation == generation {
                                    state.pending = None;
                                    inner.set_status(&mut state, ConnectionStatus::Disconnected);
                                }
                                Err(SessionError::Connection(TransportError::Connect(format!(
                                    "connection task failed: {}",
                                    e
                                ))))
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    state.pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Publish with at-least-once delivery; resolves on broker acknowledgement.
    /// Fails with `NotConnected` without touching the transport unless connected.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let connection = {
            let state = self.inner.lock();
            live_connection(&state).ok_or(SessionError::NotConnected)?
        };

        let payload = payload.into();
        let size = payload.len();
        connection.publish(topic, payload).await.map_err(|e| {
            tlog!("[session] Publish to '{}' failed: {}", topic, e);
            SessionError::Publish(e)
        })?;

        tlog!("[session] Published {} bytes to '{}'", size, topic);
        Ok(())
    }

    /// Serialise `value` as JSON and publish it
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> Result<(), SessionError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| SessionError::Encode(e.to_string()))?;
        self.publish(topic, payload).await
    }

    /// Register `handler` for `topic`, replacing any previous handler.
    ///
    /// When connected a live subscribe request is issued now; otherwise the
    /// entry stays `Pending` until the next successful connect.
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();

        let sub_state = match live_connection(&state) {
            Some(connection) => match connection.subscribe(topic) {
                Ok(()) => SubscriptionState::Active,
                Err(e) => {
                    tlog!("[session] Subscribe to '{}' failed, left pending: {}", topic, e);
                    SubscriptionState::Pending
                }
            },
            None => SubscriptionState::Pending,
        };

        let replaced = state
            .subscriptions
            .insert(
                topic.to_string(),
                Subscription {
                    handler: Arc::new(handler),
                    state: sub_state,
                },
            )
            .is_some();

        tlog!(
            "[session] {} '{}' ({:?})",
            if replaced { "Replaced handler for" } else { "Subscribed to" },
            topic,
            sub_state
        );
    }

    /// Remove the handler for `topic`. Unknown topics are ignored.
    pub fn unsubscribe(&self, topic: &str) {
        let mut state = self.inner.lock();
        if state.subscriptions.remove(topic).is_none() {
            return;
        }

        if let Some(connection) = live_connection(&state) {
            if let Err(e) = connection.unsubscribe(topic) {
                tlog!("[session] Unsubscribe from '{}' failed: {}", topic, e);
            }
        }
        tlog!("[session] Unsubscribed from '{}'", topic);
    }

    /// Close the connection and abandon any in-flight attempt.
    /// The handler table is kept; entries return to `Pending`.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.wants_connection = false;
        self.inner.teardown(&mut state, "disconnect requested");
    }

    /// Disconnect and forget every subscription
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.wants_connection = false;
        self.inner.teardown(&mut state, "reset requested");
        let dropped = state.subscriptions.len();
        state.subscriptions.clear();
        if dropped > 0 {
            tlog!("[session] Cleared {} subscription(s)", dropped);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// Receiver notified on every status transition
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscription_state(&self, topic: &str) -> Option<SubscriptionState> {
        self.inner.lock().subscriptions.get(topic).map(|s| s.state)
    }

    /// All registered topics with their state, sorted by topic
    pub fn subscriptions(&self) -> Vec<(String, SubscriptionState)> {
        let state = self.inner.lock();
        let mut subs: Vec<(String, SubscriptionState)> = state
            .subscriptions
            .iter()
            .map(|(topic, sub)| (topic.clone(), sub.state))
            .collect();
        subs.sort_by(|a, b| a.0.cmp(&b.0));
        subs
    }

    /// Whether the owner still expects the session to be up
    pub(crate) fn wants_connection(&self) -> bool {
        self.inner.lock().wants_connection
    }

    /// Register a lease holder; returns how many leases it now holds
    pub(crate) fn register_holder(&self, holder: &str) -> usize {
        let mut state = self.inner.lock();
        let count = state.holders.entry(holder.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one lease for `holder`; returns the number of distinct holders left
    pub(crate) fn release_holder(&self, holder: &str) -> usize {
        let mut state = self.inner.lock();
        if let Some(count) = state.holders.get_mut(holder) {
            *count -= 1;
            if *count == 0 {
                state.holders.remove(holder);
            }
        }
        state.holders.len()
    }

    /// Current lease holders, sorted
    pub fn holders(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut holders: Vec<String> = state.holders.keys().cloned().collect();
        holders.sort();
        holders
    }
}

fn live_connection(state: &SessionState) -> Option<Arc<dyn Connection>> {
    if state.status == ConnectionStatus::Connected {
        state.connection.clone()
    } else {
        None
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, state: &mut SessionState, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        tlog!("[session] {:?} -> {:?}", state.status, status);
        state.status = status;
        self.status_tx.send_replace(status);
    }

    fn teardown(&self, state: &mut SessionState, reason: &str) {
        state.generation += 1;
        state.pending = None;
        if let Some(connection) = state.connection.take() {
            tlog!("[session] Closing connection: {}", reason);
            connection.close();
        }
        for sub in state.subscriptions.values_mut() {
            sub.state = SubscriptionState::Pending;
        }
        self.set_status(state, ConnectionStatus::Disconnected);
    }

    async fn establish(self: Arc<Self>, generation: u64) -> Result<(), SessionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tlog!("[session] Connecting to {}", self.transport.describe());
        let opened = self.transport.open(events_tx).await;

        let mut state = self.lock();
        if state.generation != generation {
            if let Ok(connection) = opened {
                connection.close();
            }
            return Err(SessionError::Connection(TransportError::Connect(
                "connection attempt superseded by disconnect".to_string(),
            )));
        }
        state.pending = None;

        match opened {
            Ok(connection) => {
                let connection: Arc<dyn Connection> = Arc::from(connection);

                let mut restored = 0;
                for (topic, sub) in state.subscriptions.iter_mut() {
                    match connection.subscribe(topic) {
                        Ok(()) => {
                            sub.state = SubscriptionState::Active;
                            restored += 1;
                        }
                        Err(e) => tlog!("[session] Resubscribe to '{}' failed: {}", topic, e),
                    }
                }

                state.connection = Some(connection);
                self.set_status(&mut state, ConnectionStatus::Connected);
                drop(state);

                if restored > 0 {
                    tlog!("[session] Restored {} subscription(s)", restored);
                }
                tokio::spawn(self.clone().dispatch(events_rx, generation));
                Ok(())
            }
            Err(e) => {
                tlog!("[session] Connection failed: {}", e);
                self.set_status(&mut state, ConnectionStatus::Disconnected);
                Err(SessionError::Connection(e))
            }
        }
    }

    /// Deliver inbound messages for one connection, in arrival order.
    /// Handlers run without the state lock held. A panicking handler loses
    /// that one message; delivery carries on.
    async fn dispatch(self: Arc<Self>, mut events: EventReceiver, generation: u64) {
        let mut lost = String::from("event stream closed");

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message { topic, payload } => {
                    let handler = {
                        let state = self.lock();
                        if state.generation != generation {
                            return;
                        }
                        state.subscriptions.get(&topic).map(|s| s.handler.clone())
                    };
                    if let Some(handler) = handler {
                        let text = String::from_utf8_lossy(&payload);
                        if let Err(panic) =
                            std::panic::catch_unwind(AssertUnwindSafe(|| handler(&text)))
                        {
                            tlog!(
                                "[session] Handler for '{}' panicked: {}",
                                topic,
                                panic_message(panic.as_ref())
                            );
                        }
                    }
                }
                TransportEvent::Offline(reason) => {
                    lost = reason;
                    break;
                }
            }
        }

        let mut state = self.lock();
        if state.generation == generation {
            tlog!("[session] Transport offline: {}", lost);
            self.teardown(&mut state, "transport offline");
        }
    }
}
