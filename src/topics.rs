// src/topics.rs
//
// Topic names and payloads used on the broker.
//
//   driver_operator_{driverId}   chat      {"text", "senderId", "timestamp"}
//   resetData_{driverCode}       command   {"action": "reset", "timestamp"}
//   trip_update                  broadcast Trip JSON
//
// Topics are plain case-sensitive strings; no wildcards.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::models::Trip;
use crate::mqtt::SessionManager;

pub const TRIP_UPDATE_TOPIC: &str = "trip_update";

pub fn driver_chat_topic(driver_id: &str) -> String {
    format!("driver_operator_{}", driver_id)
}

pub fn reset_topic(driver_code: &str) -> String {
    format!("resetData_{}", driver_code)
}

/// ISO 8601 UTC with millisecond precision, e.g. `2024-05-01T09:30:00.000Z`
pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub text: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub timestamp: String,
}

impl ChatPayload {
    pub fn new(text: &str, sender_id: &str) -> Self {
        Self {
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            timestamp: iso_timestamp(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResetCommand {
    pub action: String,
    pub timestamp: String,
}

impl ResetCommand {
    pub fn now() -> Self {
        Self {
            action: "reset".to_string(),
            timestamp: iso_timestamp(),
        }
    }
}

/// Tell a driver's device to wipe its local data
pub async fn send_reset_command(
    session: &SessionManager,
    driver_code: &str,
) -> Result<(), SessionError> {
    session.connect().await?;
    let topic = reset_topic(driver_code.trim());
    session.publish_json(&topic, &ResetCommand::now()).await?;
    tlog!("[topics] Reset command sent for driver {}", driver_code.trim());
    Ok(())
}

/// Publish the trip's exact JSON serialisation on `trip_update`
pub async fn broadcast_trip(session: &SessionManager, trip: &Trip) -> Result<(), SessionError> {
    session.connect().await?;
    session.publish_json(TRIP_UPDATE_TOPIC, trip).await
}
