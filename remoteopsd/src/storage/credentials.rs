use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use keyring::Entry;
use thiserror::Error;

pub const DEFAULT_SERVICE_NAME: &str = "com.remoteops.accounts";
const COOKIE_SUFFIX: &str = "#cookies";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("keyring error: {0}")]
    KeyringError(#[from] keyring::Error),
}

/// Per-account secrets: the login password and the last server cookies.
pub trait CredentialStore: Send + Sync {
    fn password(&self, account: &str) -> Result<Option<String>, StorageError>;

    fn save_password(&self, account: &str, password: &str) -> Result<(), StorageError>;

    fn cookies(&self, account: &str) -> Result<Option<String>, StorageError>;

    fn save_cookies(&self, account: &str, cookies: &str) -> Result<(), StorageError>;

    /// Removes everything stored for `account`. Missing entries are not an error.
    fn forget(&self, account: &str) -> Result<(), StorageError>;
}

/// Secrets kept in the OS keyring, one entry per account and kind.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(StorageError::KeyringError(err)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(StorageError::KeyringError(err)),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn password(&self, account: &str) -> Result<Option<String>, StorageError> {
        self.read(account)
    }

    fn save_password(&self, account: &str, password: &str) -> Result<(), StorageError> {
        self.entry(account)?.set_password(password)?;
        Ok(())
    }

    fn cookies(&self, account: &str) -> Result<Option<String>, StorageError> {
        self.read(&cookie_key(account))
    }

    fn save_cookies(&self, account: &str, cookies: &str) -> Result<(), StorageError> {
        self.entry(&cookie_key(account))?.set_password(cookies)?;
        Ok(())
    }

    fn forget(&self, account: &str) -> Result<(), StorageError> {
        self.delete(account)?;
        self.delete(&cookie_key(account))
    }
}

fn cookie_key(account: &str) -> String {
    format!("{account}{COOKIE_SUFFIX}")
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    passwords: Mutex<HashMap<String, String>>,
    cookies: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn with_password(account: &str, password: &str) -> Self {
        let store = Self::default();
        lock(&store.passwords).insert(account.to_string(), password.to_string());
        store
    }
}

fn lock(map: &Mutex<HashMap<String, String>>) -> MutexGuard<'_, HashMap<String, String>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialStore for MemoryCredentialStore {
    fn password(&self, account: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.passwords).get(account).cloned())
    }

    fn save_password(&self, account: &str, password: &str) -> Result<(), StorageError> {
        lock(&self.passwords).insert(account.to_string(), password.to_string());
        Ok(())
    }

    fn cookies(&self, account: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.cookies).get(account).cloned())
    }

    fn save_cookies(&self, account: &str, cookies: &str) -> Result<(), StorageError> {
        lock(&self.cookies).insert(account.to_string(), cookies.to_string());
        Ok(())
    }

    fn forget(&self, account: &str) -> Result<(), StorageError> {
        lock(&self.passwords).remove(account);
        lock(&self.cookies).remove(account);
        Ok(())
    }
}
