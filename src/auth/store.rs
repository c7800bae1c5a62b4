use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use keyring::Entry;

const KEYRING_SERVICE: &str = "sidekik";

/// Fixed secret names under which the token pair is persisted.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Describes failures when accessing the credential backend.
#[derive(Debug)]
pub struct SecretStoreError(String);

impl SecretStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for SecretStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for SecretStoreError {}

impl From<keyring::Error> for SecretStoreError {
    fn from(err: keyring::Error) -> Self {
        Self(err.to_string())
    }
}

/// Opaque named-secret storage. The token manager only ever reads and
/// writes the two fixed keys above; everything else about the backend is
/// this trait's business.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;
    async fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// Secret store backed by the platform keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(key: &str) -> Result<Entry, SecretStoreError> {
        Entry::new(KEYRING_SERVICE, key).map_err(SecretStoreError::from)
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let entry = Self::entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let entry = Self::entry(key)?;
        entry.set_password(value).map_err(SecretStoreError::from)
    }

    async fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let entry = Self::entry(key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory secret store for tests and keyring-less environments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|_| SecretStoreError::new("secret store poisoned"))?;
        Ok(secrets.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| SecretStoreError::new("secret store poisoned"))?;
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| SecretStoreError::new("secret store poisoned"))?;
        secrets.remove(key);
        Ok(())
    }
}
