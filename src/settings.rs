use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SettingsError;

/// Broker transport: plain TCP, TLS, WebSocket or secure WebSocket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl std::str::FromStr for BrokerProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(BrokerProtocol::Tcp),
            "tls" | "mqtts" | "ssl" => Ok(BrokerProtocol::Tls),
            "ws" => Ok(BrokerProtocol::Ws),
            "wss" => Ok(BrokerProtocol::Wss),
            other => Err(format!("Unknown broker protocol '{}'", other)),
        }
    }
}

/// Connection parameters for the pub/sub broker
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_protocol")]
    pub protocol: BrokerProtocol,
    /// URL path for WebSocket transports
    #[serde(default = "default_ws_path")]
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Plain-text password. Prefer the keyring (`tripdesk credential set`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Client ID (auto-generated if None)
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Delay before the supervisor reconnects a dropped session (0 = disabled)
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    8084 // EMQX wss listener
}
fn default_broker_protocol() -> BrokerProtocol {
    BrokerProtocol::Wss
}
fn default_ws_path() -> String {
    "/mqtt".to_string()
}
fn default_keepalive_secs() -> u64 {
    60
}
fn default_clean_session() -> bool {
    true
}
fn default_reconnect_period_ms() -> u64 {
    1000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            protocol: default_broker_protocol(),
            path: default_ws_path(),
            username: None,
            password: None,
            client_id: None,
            keepalive_secs: default_keepalive_secs(),
            clean_session: default_clean_session(),
            reconnect_period_ms: default_reconnect_period_ms(),
        }
    }
}

impl BrokerConfig {
    /// Human-readable broker address, e.g. `wss://host:8084/mqtt`
    pub fn url(&self) -> String {
        match self.protocol {
            BrokerProtocol::Tcp => format!("mqtt://{}:{}", self.host, self.port),
            BrokerProtocol::Tls => format!("mqtts://{}:{}", self.host, self.port),
            BrokerProtocol::Ws => format!("ws://{}:{}{}", self.host, self.port, self.path),
            BrokerProtocol::Wss => format!("wss://{}:{}{}", self.host, self.port, self.path),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Directory for log files (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Sender ID stamped on outgoing chat messages (auto-generated if None)
    #[serde(default)]
    pub chat_sender_id: Option<String>,
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            broker: BrokerConfig::default(),
            log_dir: None,
            chat_sender_id: None,
        }
    }
}

/// Environment variables that override the settings file
pub const ENV_API_URL: &str = "TRIPDESK_API_URL";
pub const ENV_BROKER_HOST: &str = "TRIPDESK_BROKER_HOST";
pub const ENV_BROKER_PORT: &str = "TRIPDESK_BROKER_PORT";
pub const ENV_BROKER_PROTOCOL: &str = "TRIPDESK_BROKER_PROTOCOL";
pub const ENV_BROKER_USERNAME: &str = "TRIPDESK_BROKER_USERNAME";
pub const ENV_BROKER_PASSWORD: &str = "TRIPDESK_BROKER_PASSWORD";

/// Default location: `<config dir>/tripdesk/settings.json`
pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join("tripdesk").join("settings.json"))
}

/// Load settings from `path`, creating the file with defaults on first run.
pub fn load_settings_from(path: &Path) -> Result<AppSettings, SettingsError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    } else {
        let settings = AppSettings::default();
        save_settings_to(path, &settings)?;
        tlog!("[settings] Created default settings at {}", path.display());
        Ok(settings)
    }
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Apply overrides from a variable lookup (normally `std::env::var`).
pub fn apply_overrides<F>(settings: &mut AppSettings, lookup: F) -> Result<(), SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_API_URL) {
        settings.api_base_url = url;
    }
    if let Some(host) = lookup(ENV_BROKER_HOST) {
        settings.broker.host = host;
    }
    if let Some(port) = lookup(ENV_BROKER_PORT) {
        settings.broker.port = port.trim().parse().map_err(|_| SettingsError::InvalidOverride {
            key: ENV_BROKER_PORT.to_string(),
            value: port.clone(),
        })?;
    }
    if let Some(protocol) = lookup(ENV_BROKER_PROTOCOL) {
        settings.broker.protocol =
            protocol.parse().map_err(|_| SettingsError::InvalidOverride {
                key: ENV_BROKER_PROTOCOL.to_string(),
                value: protocol.clone(),
            })?;
    }
    if let Some(username) = lookup(ENV_BROKER_USERNAME) {
        settings.broker.username = Some(username);
    }
    if let Some(password) = lookup(ENV_BROKER_PASSWORD) {
        settings.broker.password = Some(password);
    }
    Ok(())
}

/// Load from an explicit path or the default location, then apply
/// environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<AppSettings, SettingsError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings_path()?,
    };
    let mut settings = load_settings_from(&path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(path.exists());

        // Second load reads the file back
        let again = load_settings_from(&path).unwrap();
        assert_eq!(again, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "api_base_url": "https://trips.example", "broker": { "host": "broker.example", "protocol": "tcp", "port": 1883 } }"#,
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.api_base_url, "https://trips.example");
        assert_eq!(settings.broker.protocol, BrokerProtocol::Tcp);
        assert_eq!(settings.broker.keepalive_secs, 60);
        assert!(settings.broker.clean_session);
        assert_eq!(settings.broker.url(), "mqtt://broker.example:1883");
    }

    #[test]
    fn test_password_not_written_when_absent() {
        let json = serde_json::to_string(&AppSettings::default()).unwrap();
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, "http://api.local"),
            (ENV_BROKER_PORT, "8883"),
            (ENV_BROKER_PROTOCOL, "mqtts"),
            (ENV_BROKER_USERNAME, "dispatcher"),
        ]
        .into_iter()
        .collect();

        let mut settings = AppSettings::default();
        apply_overrides(&mut settings, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.api_base_url, "http://api.local");
        assert_eq!(settings.broker.port, 8883);
        assert_eq!(settings.broker.protocol, BrokerProtocol::Tls);
        assert_eq!(settings.broker.username.as_deref(), Some("dispatcher"));
        assert_eq!(settings.broker.password, None);
    }

    #[test]
    fn test_bad_port_override() {
        let mut settings = AppSettings::default();
        let result = apply_overrides(&mut settings, |k| {
            (k == ENV_BROKER_PORT).then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(SettingsError::InvalidOverride { .. })));
    }

    #[test]
    fn test_default_broker_url() {
        assert_eq!(BrokerConfig::default().url(), "wss://localhost:8084/mqtt");
    }
}
