// src/chat.rs
//
// Operator <-> driver chat over `driver_operator_{driverId}`.
// Both sides publish on the same topic, so our own messages come back to us;
// they are recognised by sender ID and skipped.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::mqtt::SessionManager;
use crate::topics::{driver_chat_topic, ChatPayload};

/// Buffered messages per live feed receiver
const FEED_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sender {
    Me,
    Other,
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(text: String, sender: Sender) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            sender,
            timestamp: Utc::now(),
        }
    }
}

/// Turn an inbound payload into a chat message.
/// JSON payloads from `own_sender_id` are echoes and yield None.
/// Anything that is not a chat JSON object is shown as plain text.
pub fn parse_incoming(raw: &str, own_sender_id: &str) -> Option<ChatMessage> {
    match serde_json::from_str::<ChatPayload>(raw) {
        Ok(payload) if payload.sender_id == own_sender_id => None,
        Ok(payload) => Some(ChatMessage::new(payload.text, Sender::Other)),
        Err(e) => {
            tlog!("[chat] Received non-JSON message ({}), showing as text", e);
            Some(ChatMessage::new(raw.to_string(), Sender::Other))
        }
    }
}

/// Generate a sender ID like `client_1a2b3c4d`
pub fn generate_sender_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("client_{}", &id[..8])
}

pub struct ChatChannel {
    session: SessionManager,
    driver_id: String,
    sender_id: String,
    topic: String,
    log: Arc<Mutex<Vec<ChatMessage>>>,
    feed: broadcast::Sender<ChatMessage>,
}

impl ChatChannel {
    /// Start chatting with `driver_id`. The subscription is registered now
    /// and goes live whenever the session is connected.
    pub fn open(session: &SessionManager, driver_id: &str, sender_id: &str) -> Self {
        let driver_id = driver_id.trim().to_string();
        let topic = driver_chat_topic(&driver_id);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        let handler_log = log.clone();
        let handler_feed = feed.clone();
        let own_id = sender_id.to_string();
        session.subscribe(&topic, move |raw| {
            if let Some(message) = parse_incoming(raw, &own_id) {
                record(&handler_log, &handler_feed, message);
            }
        });
        tlog!("[chat] Chatting with driver {} on '{}'", driver_id, topic);

        Self {
            session: session.clone(),
            driver_id,
            sender_id: sender_id.to_string(),
            topic,
            log,
            feed,
        }
    }

    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `text` to the driver. Blank input is ignored (Ok(None)).
    pub async fn send(&self, text: &str) -> Result<Option<ChatMessage>, SessionError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let payload = ChatPayload::new(text, &self.sender_id);
        self.session.publish_json(&self.topic, &payload).await?;

        let message = ChatMessage::new(text.to_string(), Sender::Me);
        record(&self.log, &self.feed, message.clone());
        Ok(Some(message))
    }

    /// Conversation so far, oldest first
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Live feed of new messages (both directions)
    pub fn subscribe_messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.feed.subscribe()
    }

    /// Stop listening to this driver
    pub fn close(self) {
        self.session.unsubscribe(&self.topic);
        tlog!("[chat] Closed chat with driver {}", self.driver_id);
    }
}

fn record(log: &Mutex<Vec<ChatMessage>>, feed: &broadcast::Sender<ChatMessage>, message: ChatMessage) {
    if let Ok(mut log) = log.lock() {
        log.push(message.clone());
    }
    // No receivers is fine
    let _ = feed.send(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::mqtt::mock::MockTransport;
    use tokio::time::{timeout, Duration};

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_parse_incoming_variants() {
        let other = parse_incoming(r#"{"text":"hi","senderId":"x"}"#, "me").unwrap();
        assert_eq!(other.text, "hi");
        assert_eq!(other.sender, Sender::Other);

        assert!(parse_incoming(r#"{"text":"echo","senderId":"me"}"#, "me").is_none());

        let plain = parse_incoming("on my way", "me").unwrap();
        assert_eq!(plain.text, "on my way");
    }

    #[test]
    fn test_sender_id_shape() {
        let id = generate_sender_id();
        assert!(id.starts_with("client_"));
        assert_eq!(id.len(), 15);
    }

    #[tokio::test]
    async fn test_incoming_and_outgoing_are_logged() {
        let mock = MockTransport::new();
        let session = mock.session();
        let chat = ChatChannel::open(&session, "42", "client_me");
        let mut feed = chat.subscribe_messages();
        session.connect().await.unwrap();
        assert_eq!(mock.subscribe_count("driver_operator_42"), 1);

        mock.inject("driver_operator_42", r#"{"text":"arrived","senderId":"driver42"}"#);
        let received = timeout(WAIT, feed.recv()).await.unwrap().unwrap();
        assert_eq!(received.text, "arrived");

        let sent = chat.send("thanks").await.unwrap().unwrap();
        assert_eq!(sent.sender, Sender::Me);

        let published = mock.published();
        let payload: ChatPayload = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(published[0].0, "driver_operator_42");
        assert_eq!(payload.sender_id, "client_me");

        // Our own message echoed back by the broker is skipped
        mock.inject("driver_operator_42", std::str::from_utf8(&published[0].1).unwrap());
        mock.inject("driver_operator_42", "plain text");
        let next = timeout(WAIT, async {
            loop {
                let m = feed.recv().await.unwrap();
                if m.sender == Sender::Other {
                    return m;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(next.text, "plain text");

        let texts: Vec<String> = chat.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["arrived", "thanks", "plain text"]);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mock = MockTransport::new();
        let session = mock.session();
        let chat = ChatChannel::open(&session, "7", "client_me");

        assert!(matches!(chat.send("hello").await, Err(SessionError::NotConnected)));
        assert!(chat.send("   ").await.unwrap().is_none());
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_switching_driver_unsubscribes_old_topic() {
        let mock = MockTransport::new();
        let session = mock.session();
        session.connect().await.unwrap();

        let chat = ChatChannel::open(&session, "1", "client_me");
        assert_eq!(chat.topic(), "driver_operator_1");
        chat.close();
        let chat = ChatChannel::open(&session, " 2 ", "client_me");
        assert_eq!(chat.driver_id(), "2");

        let topics: Vec<String> = session.subscriptions().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["driver_operator_2".to_string()]);
    }
}
