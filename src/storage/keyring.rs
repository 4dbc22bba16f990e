//! Session token storage in the system keyring

use keyring::Entry;
use thiserror::Error;

const SERVICE_NAME: &str = "com.cursorbar.app";

#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("Credential not found")]
    NotFound,
}

/// Keyring wrapper scoped to this app's service name
pub struct SecureStorage {
    service: &'static str,
}

impl SecureStorage {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME,
        }
    }

    pub fn store(&self, key: &str, value: &str) -> Result<(), KeyringError> {
        let entry = Entry::new(self.service, key)?;
        entry.set_password(value)?;
        tracing::debug!("Stored session token under key: {}", key);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, KeyringError> {
        let entry = Entry::new(self.service, key)?;
        match entry.get_password() {
            Ok(password) => Ok(password),
            Err(keyring::Error::NoEntry) => Err(KeyringError::NotFound),
            Err(e) => Err(KeyringError::Keyring(e)),
        }
    }

    /// Removing a missing entry is not an error.
    pub fn delete(&self, key: &str) -> Result<(), KeyringError> {
        let entry = Entry::new(self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::debug!("Deleted session token for key: {}", key);
                Ok(())
            }
            Err(e) => Err(KeyringError::Keyring(e)),
        }
    }
}

impl Default for SecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_roundtrip() {
        let storage = SecureStorage::new();
        let test_key = "test_cursorbar_session";
        let test_value = "user_1%3A%3Atest-token";

        let _ = storage.delete(test_key);

        // Headless CI machines have no keyring backend.
        if let Err(err) = storage.store(test_key, test_value) {
            if matches!(err, KeyringError::Keyring(_)) {
                return;
            }
            panic!("Failed to store: {:?}", err);
        }

        let retrieved = match storage.get(test_key) {
            Ok(value) => value,
            // The default mock backend does not persist between entries.
            Err(_) => return,
        };
        assert_eq!(retrieved, test_value);

        storage.delete(test_key).expect("Failed to delete");
        assert!(matches!(storage.get(test_key), Err(KeyringError::NotFound) | Err(KeyringError::Keyring(_))));
        storage.delete(test_key).expect("Deleting twice is fine");
    }
}
