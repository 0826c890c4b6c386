//! Durable session persistence.
//!
//! A session is stored as three independent keys in a key/value backend:
//! `accessToken`, `refreshToken` and `accessTokenExp` (a JSON number of epoch
//! seconds). The backend knows nothing about expiry; interpreting it is the
//! session manager's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const ACCESS_TOKEN_EXP_KEY: &str = "accessTokenExp";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, ACCESS_TOKEN_EXP_KEY];

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

/// Keychain service name for the keyring backend
pub const KEYRING_SERVICE: &str = "taskrs";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session storage is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Stored value for {key} is corrupt: {reason}")]
    Corrupt { key: &'static str, reason: String },
}

/// The persisted session.
///
/// `access_token_expiry` is always the `exp` claim of `access_token` at the
/// time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expiry: DateTime<Utc>,
}

pub trait SessionStore: Send + Sync {
    /// The full session, or `None` when no complete session is stored.
    fn get(&self) -> Result<Option<SessionRecord>, StoreError>;

    fn set(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Replace the access token and its expiry, leaving the refresh token alone.
    fn update_access_token(&self, token: &str, expiry: DateTime<Utc>) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    fn access_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get()?.map(|r| r.access_token))
    }

    fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get()?.map(|r| r.refresh_token))
    }
}

// ============================================================================
// Key/value backends
// ============================================================================

/// Opaque string storage scoped to this client installation.
///
/// A missing key is `Ok(None)`, never an error.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// In-process storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut map = self.entries();
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut map = self.entries();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// All keys in a single JSON object on disk, rewritten whole on every change.
pub struct FileBackend {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backend at `<cache_dir>/session.json`
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HashMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read()?;
        f(&mut entries);
        self.write(&entries)
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_many(&[key])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        self.modify(|map| {
            for (key, value) in entries {
                map.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.modify(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
    }
}

/// One OS keychain entry per key.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyValueBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Session store over a backend
// ============================================================================

pub struct KeyValueSessionStore<B> {
    backend: B,
}

impl<B: KeyValueBackend> KeyValueSessionStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn encode_expiry(expiry: DateTime<Utc>) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&expiry.timestamp())?)
    }

    fn decode_expiry(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let seconds = value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.floor() as i64))
            .ok_or_else(|| StoreError::Corrupt {
                key: ACCESS_TOKEN_EXP_KEY,
                reason: format!("expected a number, found {}", value),
            })?;
        DateTime::from_timestamp(seconds, 0).ok_or_else(|| StoreError::Corrupt {
            key: ACCESS_TOKEN_EXP_KEY,
            reason: format!("timestamp {} out of range", seconds),
        })
    }
}

impl<B: KeyValueBackend> SessionStore for KeyValueSessionStore<B> {
    fn get(&self) -> Result<Option<SessionRecord>, StoreError> {
        let access_token = self.backend.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.backend.get(REFRESH_TOKEN_KEY)?;
        let expiry = self.backend.get(ACCESS_TOKEN_EXP_KEY)?;

        match (access_token, refresh_token, expiry) {
            (Some(access_token), Some(refresh_token), Some(expiry)) => Ok(Some(SessionRecord {
                access_token,
                refresh_token,
                access_token_expiry: Self::decode_expiry(&expiry)?,
            })),
            (None, None, None) => Ok(None),
            (a, r, e) => {
                debug!(
                    has_access = a.is_some(),
                    has_refresh = r.is_some(),
                    has_expiry = e.is_some(),
                    "Incomplete session in storage, treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn set(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let expiry = Self::encode_expiry(record.access_token_expiry)?;
        self.backend.set_many(&[
            (ACCESS_TOKEN_KEY, record.access_token.as_str()),
            (REFRESH_TOKEN_KEY, record.refresh_token.as_str()),
            (ACCESS_TOKEN_EXP_KEY, expiry.as_str()),
        ])
    }

    fn update_access_token(&self, token: &str, expiry: DateTime<Utc>) -> Result<(), StoreError> {
        let expiry = Self::encode_expiry(expiry)?;
        self.backend
            .set_many(&[(ACCESS_TOKEN_KEY, token), (ACCESS_TOKEN_EXP_KEY, expiry.as_str())])
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove_many(&SESSION_KEYS)
    }

    fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.backend.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.backend.get(REFRESH_TOKEN_KEY)
    }
}

/// Session store kept only in memory
pub type MemorySessionStore = KeyValueSessionStore<MemoryBackend>;

impl MemorySessionStore {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}
