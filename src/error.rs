// src/error.rs
//
// Error types shared across the session, transport and REST layers.

use thiserror::Error;

/// Failure reported by a pub/sub transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the connection
    #[error("connect failed: {0}")]
    Connect(String),

    /// The client refused to queue a request (subscribe, unsubscribe, publish)
    #[error("request rejected: {0}")]
    Request(String),

    /// A publish was not acknowledged by the broker
    #[error("publish failed: {0}")]
    Publish(String),

    /// Options could not be turned into a transport configuration
    #[error("invalid broker configuration: {0}")]
    Config(String),
}

/// Errors surfaced by [`crate::mqtt::SessionManager`] operations.
///
/// `Clone` because a single connection attempt is shared by every caller
/// awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport failed to establish, or the attempt was superseded
    #[error("connection error: {0}")]
    Connection(TransportError),

    /// Operation requires a connected session
    #[error("MQTT client not connected")]
    NotConnected,

    /// The broker did not acknowledge a publish
    #[error("publish error: {0}")]
    Publish(TransportError),

    /// Payload could not be serialised before publishing
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Errors from the REST backend client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or malformed request
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server replied with a non-success status
    #[error("{context} (status {status})")]
    Status {
        status: reqwest::StatusCode,
        context: String,
    },

    /// Response body was not the expected JSON shape
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Base URL missing or unusable
    #[error("invalid API base URL '{0}'")]
    BaseUrl(String),
}

/// Errors loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine a config directory")]
    NoConfigDir,

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
}

/// Top-level error for the command-line front end.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Errors talking to the OS keyring.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}
