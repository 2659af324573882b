// src/mqtt/mock.rs
//
// In-memory transport for tests. Records every request, lets a test script
// the outcome of each open and inject inbound events.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::session::SessionManager;
use super::transport::{Connection, EventSender, Transport, TransportEvent};
use crate::error::TransportError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    Close,
}

enum OpenScript {
    Fail(TransportError),
    Gate(oneshot::Receiver<Result<(), TransportError>>),
}

#[derive(Default)]
struct MockShared {
    opens: AtomicUsize,
    scripts: Mutex<VecDeque<OpenScript>>,
    calls: Mutex<Vec<Call>>,
    events: Mutex<Option<EventSender>>,
    publish_error: Mutex<Option<TransportError>>,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session(&self) -> SessionManager {
        SessionManager::new(self.clone())
    }

    /// Next open fails with `err`
    pub(crate) fn fail_next_open(&self, err: TransportError) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .push_back(OpenScript::Fail(err));
    }

    /// Next open blocks until the returned sender decides its outcome
    pub(crate) fn gate(&self) -> oneshot::Sender<Result<(), TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .scripts
            .lock()
            .unwrap()
            .push_back(OpenScript::Gate(rx));
        tx
    }

    pub(crate) fn fail_publishes(&self, err: TransportError) {
        *self.shared.publish_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscribe_count(&self, topic: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Subscribe(t) if t == topic))
            .count()
    }

    pub(crate) fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    /// Deliver an inbound message on the most recent connection
    pub(crate) fn inject(&self, topic: &str, payload: &str) {
        self.send(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub(crate) fn go_offline(&self, reason: &str) {
        self.send(TransportEvent::Offline(reason.to_string()));
    }

    fn send(&self, event: TransportEvent) {
        if let Some(tx) = self.shared.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn record(shared: &MockShared, call: Call) {
        shared.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, events: EventSender) -> Result<Box<dyn Connection>, TransportError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.shared.scripts.lock().unwrap().pop_front();

        match script {
            None => {}
            Some(OpenScript::Fail(err)) => return Err(err),
            Some(OpenScript::Gate(rx)) => {
                rx.await
                    .unwrap_or_else(|_| Err(TransportError::Connect("gate dropped".into())))?;
            }
        }

        *self.shared.events.lock().unwrap() = Some(events);
        Ok(Box::new(MockConnection {
            shared: self.shared.clone(),
        }))
    }

    fn describe(&self) -> String {
        "mock://broker".to_string()
    }
}

struct MockConnection {
    shared: Arc<MockShared>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if let Some(err) = self.shared.publish_error.lock().unwrap().clone() {
            return Err(err);
        }
        MockTransport::record(
            &self.shared,
            Call::Publish {
                topic: topic.to_string(),
                payload,
            },
        );
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        MockTransport::record(&self.shared, Call::Subscribe(topic.to_string()));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        MockTransport::record(&self.shared, Call::Unsubscribe(topic.to_string()));
        Ok(())
    }

    fn close(&self) {
        MockTransport::record(&self.shared, Call::Close);
    }
}
