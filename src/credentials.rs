//! Broker credential storage using the system keyring.
//!
//! Uses the native OS credential store:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KWallet)

use keyring::Entry;

use crate::error::CredentialError;
use crate::settings::BrokerConfig;

const SERVICE_NAME: &str = "com.tripdesk.broker";

/// Builds the account name for a broker credential, scoped by host and user.
fn account_name(host: &str, username: &str) -> String {
    format!("{}:{}", host, username)
}

/// Store the broker password in the system keyring.
pub fn store_broker_password(host: &str, username: &str, password: &str) -> Result<(), CredentialError> {
    let entry = Entry::new(SERVICE_NAME, &account_name(host, username))?;
    entry.set_password(password)?;
    Ok(())
}

/// Retrieve the broker password. Returns Ok(None) if none is stored.
pub fn get_broker_password(host: &str, username: &str) -> Result<Option<String>, CredentialError> {
    let entry = Entry::new(SERVICE_NAME, &account_name(host, username))?;
    match entry.get_password() {
        Ok(pw) => Ok(Some(pw)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete the broker password. Returns Ok(()) even if none was stored.
pub fn delete_broker_password(host: &str, username: &str) -> Result<(), CredentialError> {
    let entry = Entry::new(SERVICE_NAME, &account_name(host, username))?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fill in `config.password` from the keyring when a username is set and
/// no password was given in settings or the environment.
/// Keyring failures are logged and leave the config unchanged.
pub fn resolve_broker_password(config: &mut BrokerConfig) {
    if config.password.is_some() {
        return;
    }
    let Some(username) = config.username.clone() else {
        return;
    };
    match get_broker_password(&config.host, &username) {
        Ok(Some(pw)) => config.password = Some(pw),
        Ok(None) => {}
        Err(e) => tlog!("[credentials] Keyring lookup failed for '{}': {}", username, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_name() {
        assert_eq!(
            account_name("broker.example", "dispatcher"),
            "broker.example:dispatcher"
        );
    }

    #[test]
    fn test_resolve_keeps_explicit_password() {
        let mut config = BrokerConfig {
            username: Some("dispatcher".into()),
            password: Some("from-env".into()),
            ..BrokerConfig::default()
        };
        resolve_broker_password(&mut config);
        assert_eq!(config.password.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_resolve_without_username_is_noop() {
        let mut config = BrokerConfig::default();
        resolve_broker_password(&mut config);
        assert_eq!(config.password, None);
    }
}
