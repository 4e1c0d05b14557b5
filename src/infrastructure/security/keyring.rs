use crate::domain::error::{AppError, Result};
use keyring::Entry;
use tracing::debug;

/// OS keychain entries under one service name.
pub struct KeyringManager {
    service: String,
}

impl KeyringManager {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).map_err(|e| {
            AppError::ConfigError(format!("Failed to access keychain entry '{}': {}", key, e))
        })
    }

    pub fn set_secret(&self, key: &str, secret: &str) -> Result<()> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| AppError::ConfigError(format!("Failed to store secret '{}': {}", key, e)))?;
        debug!(service = %self.service, key, "Stored secret in keychain");
        Ok(())
    }

    pub fn get_secret(&self, key: &str) -> Result<String> {
        self.entry(key)?.get_password().map_err(|e| {
            AppError::ConfigError(format!("Failed to read secret '{}' from keychain: {}", key, e))
        })
    }

    pub fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::ConfigError(format!(
                "Failed to delete secret '{}': {}",
                key, e
            ))),
        }
    }
}
