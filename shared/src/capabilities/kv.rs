use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_PREFIX_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    /// Skips validation; only for compile-time constant keys.
    pub(crate) fn from_static(namespace: KeyNamespace, key: &'static str) -> Self {
        debug_assert!(Self::validate_key(key).is_ok());
        Self {
            namespace,
            key: key.to_string(),
        }
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {MAX_KEY_LENGTH} bytes"),
            });
        }

        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot look like a path".to_string(),
            });
        }

        if key.chars().any(char::is_control) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains control characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Outbox,
    Settings,
    Cache,
    Custom(String),
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Outbox => "outbox",
            KeyNamespace::Settings => "settings",
            KeyNamespace::Cache => "cache",
            KeyNamespace::Custom(s) => s.as_str(),
        }
    }

    pub fn custom(prefix: impl Into<String>) -> Result<Self, KvError> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: format!("custom namespace must be 1..={MAX_PREFIX_LENGTH} bytes"),
            });
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: "custom namespace contains invalid characters".to_string(),
            });
        }
        Ok(KeyNamespace::Custom(prefix))
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl KvError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

fn check_value_size(value: &[u8]) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Durable string-keyed storage. Writes must be durable when `set` returns `Ok`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError>;
    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError>;
    async fn delete(&self, key: &KvKey) -> Result<(), KvError>;
}

/// Process-lifetime store. Useful for hosts without a disk and for tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.lock().await.get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
        check_value_size(&value)?;
        self.entries.lock().await.insert(key.raw(), value);
        Ok(())
    }

    async fn delete(&self, key: &KvKey) -> Result<(), KvError> {
        self.entries.lock().await.remove(&key.raw());
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKvStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{check_value_size, KvError, KvKey, KvStore};
    use async_trait::async_trait;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::{Arc, Mutex, PoisonError};
    use tracing::debug;

    impl From<rusqlite::Error> for KvError {
        fn from(e: rusqlite::Error) -> Self {
            KvError::storage(e.to_string())
        }
    }

    /// SQLite-backed store; every `set` is its own committed transaction.
    #[derive(Clone)]
    pub struct SqliteKvStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl SqliteKvStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path.as_ref())?;
            debug!(path = %path.as_ref().display(), "opened kv database");
            Self::with_connection(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            Self::with_connection(Connection::open_in_memory()?)
        }

        fn with_connection(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        async fn run<T, F>(&self, op: F) -> Result<T, KvError>
        where
            T: Send + 'static,
            F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                op(&guard).map_err(KvError::from)
            })
            .await
            .map_err(|e| KvError::storage(format!("storage task failed: {e}")))?
        }
    }

    #[async_trait]
    impl KvStore for SqliteKvStore {
        async fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
            let raw = key.raw();
            self.run(move |conn| {
                conn.query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![raw],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()
            })
            .await
        }

        async fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<(), KvError> {
            check_value_size(&value)?;
            let raw = key.raw();
            let now = i64::try_from(crate::model::get_current_time_ms()).unwrap_or(i64::MAX);
            self.run(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                    params![raw, value, now],
                )
                .map(|_| ())
            })
            .await
        }

        async fn delete(&self, key: &KvKey) -> Result<(), KvError> {
            let raw = key.raw();
            self.run(move |conn| {
                conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![raw])
                    .map(|_| ())
            })
            .await
        }
    }
}
