// src/models.rs
//
// Wire types for the trip backend. Field names follow the backend's JSON
// exactly (snake_case for trips, camelCase inside patches).

use serde::{Deserialize, Serialize};

// ============================================================================
// Trips
// ============================================================================

/// A time value as the backend sends it: either epoch milliseconds or a
/// string. Preserved as received so re-serialising a trip is lossless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    /// Current wall-clock time in epoch milliseconds
    pub fn now() -> Self {
        Timestamp::Millis(chrono::Utc::now().timestamp_millis())
    }

    /// Coerce to epoch milliseconds.
    /// Numeric strings parse directly; RFC 3339 strings are converted.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Timestamp::Millis(ms) => Some(*ms),
            Timestamp::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.timestamp_millis())
                })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Created,
    InProgress,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Created => "CREATED",
            TripStatus::InProgress => "IN_PROGRESS",
            TripStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(TripStatus::Created),
            "IN_PROGRESS" => Ok(TripStatus::InProgress),
            "COMPLETED" => Ok(TripStatus::Completed),
            other => Err(format!("Unknown trip status '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Load,
    Unload,
    Verify,
}

/// An atomic action at a stop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub stop_id: i64,
    pub task_type: TaskType,
    pub sequence: i64,
    pub task_name: String,
}

/// A location within a trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: i64,
    pub trip_id: i64,
    pub name: String,
    pub sequence: i64,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A logistics job with a status and an ordered list of stops
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub expected_start_time: Timestamp,
    pub actual_start_time: Timestamp,
    pub status: TripStatus,
    #[serde(default)]
    pub stops: Vec<Stop>,
}

impl Trip {
    /// A blank trip as the create form starts it: id 0, both times now,
    /// status CREATED, no stops. The backend assigns the id.
    pub fn draft() -> Self {
        let now = Timestamp::now();
        Self {
            id: 0,
            expected_start_time: now.clone(),
            actual_start_time: now,
            status: TripStatus::Created,
            stops: Vec::new(),
        }
    }

    /// Body for `PUT /api/trips/:id`; the id travels in the URL instead
    pub fn update_body(&self) -> TripUpdate<'_> {
        TripUpdate {
            expected_start_time: &self.expected_start_time,
            actual_start_time: &self.actual_start_time,
            status: self.status,
            stops: &self.stops,
        }
    }

    /// Stops in sequence order, each with its tasks in sequence order
    pub fn ordered_stops(&self) -> Vec<Stop> {
        let mut stops = self.stops.clone();
        stops.sort_by_key(|s| s.sequence);
        for stop in &mut stops {
            stop.tasks.sort_by_key(|t| t.sequence);
        }
        stops
    }
}

/// Trip without its id, borrowed from a [`Trip`]
#[derive(Debug, Serialize)]
pub struct TripUpdate<'a> {
    pub expected_start_time: &'a Timestamp,
    pub actual_start_time: &'a Timestamp,
    pub status: TripStatus,
    pub stops: &'a [Stop],
}

// ============================================================================
// Patches
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTripData {
    pub trip_code: String,
    pub trip_start_time: String,
    pub source_location: String,
    pub destination_location: String,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Vec<PatchTripData>,
}

/// A server-issued batch of trip corrections
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: PatchContent,
}
