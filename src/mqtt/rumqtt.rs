// src/mqtt/rumqtt.rs
//
// Broker transport backed by rumqttc. Supports plain TCP, TLS, WebSocket and
// secure WebSocket (browsers reach brokers only over the WebSocket upgrade
// path, so the default profile is wss on :8084/mqtt).
//
// A driver task owns the rumqttc event loop for each connection. It resolves
// `open()` on CONNACK, forwards inbound PUBLISH packets, matches PUBACKs to
// waiting publishers and reports the first event-loop error as `Offline`.
// It does not retry; reconnecting is the session's decision.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport as MqttTransport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio::time::Duration;

use super::transport::{Connection, EventSender, Transport, TransportEvent};
use crate::error::TransportError;
use crate::settings::{BrokerConfig, BrokerProtocol};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;

/// How long `close()` lets the driver flush the DISCONNECT packet
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

/// Minimum keepalive accepted by the broker profile
const MIN_KEEPALIVE_SECS: u64 = 5;

pub struct RumqttTransport {
    config: BrokerConfig,
}

impl RumqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> Result<MqttOptions, TransportError> {
        let config = &self.config;
        if config.host.trim().is_empty() {
            return Err(TransportError::Config("broker host is empty".to_string()));
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);

        // WebSocket transports take the full URL in place of the host
        let mut options = match config.protocol {
            BrokerProtocol::Tcp | BrokerProtocol::Tls => {
                MqttOptions::new(client_id, config.host.clone(), config.port)
            }
            BrokerProtocol::Ws | BrokerProtocol::Wss => {
                MqttOptions::new(client_id, config.url(), config.port)
            }
        };

        options.set_keep_alive(Duration::from_secs(
            config.keepalive_secs.max(MIN_KEEPALIVE_SECS),
        ));
        options.set_clean_session(config.clean_session);

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        match config.protocol {
            BrokerProtocol::Tcp => {}
            BrokerProtocol::Tls => {
                options.set_transport(MqttTransport::tls_with_default_config());
            }
            BrokerProtocol::Ws => {
                options.set_transport(MqttTransport::Ws);
            }
            BrokerProtocol::Wss => {
                options.set_transport(MqttTransport::wss_with_default_config());
            }
        }

        Ok(options)
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn open(&self, events: EventSender) -> Result<Box<dyn Connection>, TransportError> {
        let options = self.options()?;
        let label = self.describe();
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let acks = Arc::new(AckTracker::default());
        let closing = Arc::new(Notify::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(drive(
            eventloop,
            events,
            acks.clone(),
            closing.clone(),
            ready_tx,
            label.clone(),
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                tlog!("[mqtt] Connected to {}", label);
                Ok(Box::new(RumqttConnection {
                    client,
                    acks,
                    closing,
                    publish_order: tokio::sync::Mutex::new(()),
                }))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Connect(
                "event loop ended before CONNACK".to_string(),
            )),
        }
    }

    fn describe(&self) -> String {
        self.config.url()
    }
}

// ============================================================================
// Connection
// ============================================================================

struct RumqttConnection {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    closing: Arc<Notify>,
    /// Serialises enqueue-then-send so PUBACK waiters line up with packet ids
    publish_order: tokio::sync::Mutex<()>,
}

#[async_trait]
impl Connection for RumqttConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let ack = {
            let _order = self.publish_order.lock().await;
            // Withdrawn on drop unless the request reached the client
            let (mut waiter, ack) = self.acks.enqueue();
            self.client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            waiter.keep();
            ack
        };

        match ack.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Publish(
                "connection closed before PUBACK".to_string(),
            )),
        }
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn close(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tlog!("[mqtt] Failed to queue DISCONNECT: {}", e);
        }
        self.closing.notify_one();
    }
}

// ============================================================================
// PUBACK tracking
// ============================================================================

type AckSender = oneshot::Sender<Result<(), TransportError>>;
type AckReceiver = oneshot::Receiver<Result<(), TransportError>>;

/// Publishes leave the client in request order, so waiters are queued in the
/// same order and bound to a packet id when the outgoing PUBLISH is seen.
#[derive(Default)]
struct AckTracker {
    inner: Mutex<AckState>,
}

#[derive(Default)]
struct AckState {
    next_id: u64,
    queued: VecDeque<(u64, AckSender)>,
    in_flight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, AckState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(self: &Arc<Self>) -> (QueuedAck, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queued.push_back((id, tx));
        let waiter = QueuedAck {
            tracker: self.clone(),
            id,
            keep: false,
        };
        (waiter, rx)
    }

    fn withdraw(&self, id: u64) {
        self.lock().queued.retain(|(queued, _)| *queued != id);
    }

    fn assign(&self, pkid: u16) {
        let mut state = self.lock();
        if let Some((_, tx)) = state.queued.pop_front() {
            state.in_flight.insert(pkid, tx);
        }
    }

    fn acknowledge(&self, pkid: u16) {
        if let Some(tx) = self.lock().in_flight.remove(&pkid) {
            let _ = tx.send(Ok(()));
        }
    }

    fn fail_all(&self, reason: &str) {
        let mut state = self.lock();
        let queued: Vec<AckSender> = state.queued.drain(..).map(|(_, tx)| tx).collect();
        let in_flight: Vec<AckSender> = state.in_flight.drain().map(|(_, tx)| tx).collect();
        drop(state);
        for tx in queued.into_iter().chain(in_flight) {
            let _ = tx.send(Err(TransportError::Publish(reason.to_string())));
        }
    }
}

/// A waiter's place in the queue. Dropping it before `keep()` takes the
/// waiter back out, so an abandoned or failed send cannot claim the next
/// packet id.
struct QueuedAck {
    tracker: Arc<AckTracker>,
    id: u64,
    keep: bool,
}

impl QueuedAck {
    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for QueuedAck {
    fn drop(&mut self) {
        if !self.keep {
            self.tracker.withdraw(self.id);
        }
    }
}

// ============================================================================
// Event loop driver
// ============================================================================

async fn drive(
    mut eventloop: EventLoop,
    events: EventSender,
    acks: Arc<AckTracker>,
    closing: Arc<Notify>,
    ready: oneshot::Sender<Result<(), TransportError>>,
    label: String,
) {
    let mut ready = Some(ready);

    loop {
        let polled = tokio::select! {
            _ = closing.notified() => {
                let _ = tokio::time::timeout(DISCONNECT_FLUSH, flush_disconnect(&mut eventloop)).await;
                acks.fail_all("connection closed");
                tlog!("[mqtt] Closed connection to {}", label);
                return;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let outcome = if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
                let refused = outcome.is_err();
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None if refused => {
                        let _ = events.send(TransportEvent::Offline(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    None => {}
                }
                if refused {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = events.send(TransportEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => acks.acknowledge(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => acks.assign(pkid),
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                acks.fail_all(&reason);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(TransportError::Connect(reason)));
                    }
                    None => {
                        tlog!("[mqtt] Offline from {}: {}", label, reason);
                        let _ = events.send(TransportEvent::Offline(reason));
                    }
                }
                return;
            }
        }
    }
}

/// Poll until the queued DISCONNECT has been written (or the loop errors)
async fn flush_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// `tripdesk_` plus 8 hex characters
fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("tripdesk_{}", &id[..8])
}
