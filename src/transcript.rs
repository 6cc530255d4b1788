use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const STORAGE_KEY: &str = "deepseek-chat-history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }
}

/// What is written under [`STORAGE_KEY`].
#[derive(Debug, Serialize, Deserialize)]
struct SavedHistory {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// String key/value persistence, the only thing the transcript needs from a
/// backend.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Single-table sqlite store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T, StoreError> {
        // A poisoned lock still guards a usable connection.
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(f(&conn)?)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]).map(|_| ()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().ok().and_then(|v| v.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
        Ok(())
    }
}

/// Loads and saves the ordered message list under one key.
pub struct TranscriptStore {
    backend: Box<dyn KeyValueStore>,
    key: String,
}

impl TranscriptStore {
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self::with_key(backend, STORAGE_KEY)
    }

    pub fn with_key(backend: Box<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        TranscriptStore {
            backend,
            key: key.into(),
        }
    }

    /// Restores the saved messages. Unreadable or corrupt history is deleted
    /// and an empty transcript is returned instead.
    pub fn load(&self) -> Vec<Message> {
        let loaded = self
            .backend
            .get(&self.key)
            .and_then(|raw| match raw {
                Some(raw) => Ok(serde_json::from_str::<SavedHistory>(&raw)?.messages),
                None => Ok(Vec::new()),
            });

        match loaded {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("Error loading chat history: {}", e);
                if let Err(e) = self.backend.remove(&self.key) {
                    tracing::warn!("Could not remove corrupt chat history: {}", e);
                }
                Vec::new()
            }
        }
    }

    pub fn save(&self, messages: &[Message]) -> Result<(), StoreError> {
        self.save_at(messages, Utc::now())
    }

    fn save_at(&self, messages: &[Message], at: DateTime<Utc>) -> Result<(), StoreError> {
        let saved = SavedHistory {
            messages: messages.to_vec(),
            timestamp: Some(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        };
        let json = serde_json::to_string(&saved)?;
        self.backend.set(&self.key, &json)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove(&self.key)
    }

    pub fn raw(&self) -> Result<Option<String>, StoreError> {
        self.backend.get(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Vec<Message> {
        vec![
            Message::new(Role::User, "What is Rust?"),
            Message::new(Role::Assistant, "A **systems** language."),
            Message::new(Role::User, "Thanks"),
        ]
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let store = TranscriptStore::new(Box::new(MemoryStore::new()));
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), sample());
    }

    #[test]
    fn test_saved_shape() {
        let store = TranscriptStore::new(Box::new(MemoryStore::new()));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        store.save_at(&sample()[..1], at).unwrap();

        let raw = store.raw().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "What is Rust?");
        assert_eq!(value["timestamp"], "2024-05-01T12:30:00.000Z");
    }

    #[test]
    fn test_missing_key_is_empty() {
        let store = TranscriptStore::new(Box::new(MemoryStore::new()));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_history_is_removed() {
        let backend = MemoryStore::new();
        backend.set(STORAGE_KEY, "{not json").unwrap();
        let store = TranscriptStore::new(Box::new(backend));

        assert!(store.load().is_empty());
        assert_eq!(store.raw().unwrap(), None);
    }

    #[test]
    fn test_history_without_messages_field() {
        let backend = MemoryStore::new();
        backend.set(STORAGE_KEY, r#"{"timestamp":"2024-01-01T00:00:00.000Z"}"#).unwrap();
        let store = TranscriptStore::new(Box::new(backend));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.sqlite");

        {
            let store = TranscriptStore::new(Box::new(SqliteStore::open(&path).unwrap()));
            store.save(&sample()).unwrap();
            store.save(&sample()[..2]).unwrap();
        }

        let store = TranscriptStore::new(Box::new(SqliteStore::open(&path).unwrap()));
        assert_eq!(store.load(), sample()[..2].to_vec());

        store.clear().unwrap();
        assert!(store.load().is_empty());
    }
}
