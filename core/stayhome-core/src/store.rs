//! Durable key/value state for the reconciler.
//!
//! The store is deliberately dumb: string keys, string values. Typed access
//! for the reconciliation fields lives in the free functions at the bottom,
//! which also define the failure policy: a read that fails is a value that is
//! absent.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::types::{ReconciliationState, UserIdentity};

pub const KEY_USER_ID: &str = "user_id";
pub const KEY_HOME_SSID: &str = "home_ssid";
pub const KEY_HOME_BSSID: &str = "home_bssid";
pub const KEY_CURRENT_LOG_ID: &str = "current_log_id";

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;

    /// Writes several keys. Implementations that can should make this atomic.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn clear_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.clear(key)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════════════

/// SQLite-backed store. Opens a connection per operation so concurrent
/// triggers on different threads never share a handle.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );",
            )
            .map_err(|source| query_error("initialize schema", source))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| StoreError::Io {
                context: "create state directory".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| query_error("enable WAL", source))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|source| query_error("set synchronous", source))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|source| query_error("set busy_timeout", source))?;

        Ok(conn)
    }
}

impl StateStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| query_error("read value", source))
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.clear_many(&[key])
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|source| query_error("begin write", source))?;
            for (key, value) in entries {
                tx.execute(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET \
                        value = excluded.value, \
                        updated_at = excluded.updated_at",
                    params![key, value, now],
                )
                .map_err(|source| query_error("write value", source))?;
            }
            tx.commit()
                .map_err(|source| query_error("commit write", source))
        })
    }

    fn clear_many(&self, keys: &[&str]) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|source| query_error("begin clear", source))?;
            for key in keys {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .map_err(|source| query_error("clear value", source))?;
            }
            tx.commit()
                .map_err(|source| query_error("commit clear", source))
        })
    }
}

fn query_error(context: &str, source: rusqlite::Error) -> StoreError {
    StoreError::Query {
        context: context.to_string(),
        source,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local store for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: &ReconciliationState) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            for (key, value) in state_entries(state) {
                values.insert(key.to_string(), value);
            }
        }
        store
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed access
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads the full reconciliation state. Fields that fail to load come back
/// as `None`, never as an error.
pub fn load_state(store: &dyn StateStore) -> ReconciliationState {
    ReconciliationState {
        user_id: read_id(store, KEY_USER_ID),
        home_ssid: read_string(store, KEY_HOME_SSID),
        home_bssid: read_string(store, KEY_HOME_BSSID),
        current_log_id: read_id(store, KEY_CURRENT_LOG_ID),
    }
}

pub fn load_current_log_id(store: &dyn StateStore) -> Option<i64> {
    read_id(store, KEY_CURRENT_LOG_ID)
}

/// Like [`load_current_log_id`], but a failed read is an error rather than
/// an absent value.
pub fn try_load_current_log_id(store: &dyn StateStore) -> Result<Option<i64>> {
    Ok(store
        .get(KEY_CURRENT_LOG_ID)?
        .and_then(|raw| parse_id(KEY_CURRENT_LOG_ID, raw)))
}

pub fn save_current_log_id(store: &dyn StateStore, log_id: i64) -> Result<()> {
    store.set(KEY_CURRENT_LOG_ID, &log_id.to_string())
}

pub fn clear_current_log_id(store: &dyn StateStore) -> Result<()> {
    store.clear(KEY_CURRENT_LOG_ID)
}

pub fn save_identity(store: &dyn StateStore, identity: &UserIdentity) -> Result<()> {
    let user_id = identity.id.to_string();
    store.set_many(&[
        (KEY_USER_ID, user_id.as_str()),
        (KEY_HOME_SSID, identity.home_ssid.as_str()),
        (KEY_HOME_BSSID, identity.home_bssid.as_str()),
    ])
}

pub fn clear_identity(store: &dyn StateStore) -> Result<()> {
    store.clear_many(&[KEY_USER_ID, KEY_HOME_SSID, KEY_HOME_BSSID, KEY_CURRENT_LOG_ID])
}

fn state_entries(state: &ReconciliationState) -> Vec<(&'static str, String)> {
    let mut entries = Vec::new();
    if let Some(user_id) = state.user_id {
        entries.push((KEY_USER_ID, user_id.to_string()));
    }
    if let Some(ssid) = &state.home_ssid {
        entries.push((KEY_HOME_SSID, ssid.clone()));
    }
    if let Some(bssid) = &state.home_bssid {
        entries.push((KEY_HOME_BSSID, bssid.clone()));
    }
    if let Some(log_id) = state.current_log_id {
        entries.push((KEY_CURRENT_LOG_ID, log_id.to_string()));
    }
    entries
}

fn read_string(store: &dyn StateStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(key, error = %err, "State read failed; treating as absent");
            None
        }
    }
}

fn read_id(store: &dyn StateStore, key: &str) -> Option<i64> {
    parse_id(key, read_string(store, key)?)
}

fn parse_id(key: &str, raw: String) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            let err = StoreError::CorruptValue {
                key: key.to_string(),
                value: raw,
            };
            tracing::warn!(error = %err, "Ignoring unparseable state value");
            None
        }
    }
}
