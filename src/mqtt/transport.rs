// src/mqtt/transport.rs
//
// Seam between the session manager and a concrete pub/sub client.
// A transport opens connections; a connection reports what happens on the
// wire through a `TransportEvent` channel handed to it at open time.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Something that happened on an open connection
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Inbound message on `topic`
    Message { topic: String, payload: Vec<u8> },
    /// Connection lost (network error, broker closed the socket, keepalive timeout)
    Offline(String),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens physical connections to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and wait until the broker accepts it.
    /// Events for the connection's lifetime are delivered on `events`.
    async fn open(&self, events: EventSender) -> Result<Box<dyn Connection>, TransportError>;

    /// Short description for log lines (e.g. the broker URL)
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// One established connection.
///
/// `subscribe`, `unsubscribe` and `close` only queue the request and return
/// immediately; `publish` resolves once the broker has acknowledged it.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn close(&self);
}
