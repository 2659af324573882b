// src/mqtt/mod.rs
//
// Shared publish/subscribe session over an MQTT broker.

mod lease;
#[cfg(test)]
pub(crate) mod mock;
pub mod reconnect;
mod rumqtt;
mod session;
mod transport;

// Re-export public items
pub use lease::SessionLease;
pub use rumqtt::RumqttTransport;
pub use session::{ConnectionStatus, MessageHandler, SessionManager, SubscriptionState};
pub use transport::{Connection, EventReceiver, EventSender, Transport, TransportEvent};
