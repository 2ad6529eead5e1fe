//! Error types for stayhome-core operations.
//!
//! Every failure that can reach the reconciler is typed here, but the
//! reconciler itself never propagates them: it logs and keeps its belief.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Local Storage Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open state store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("State store query failed: {context}: {source}")]
    Query {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored value for {key} is corrupt: {value:?}")]
    CorruptValue { key: String, value: String },

    #[error("State store lock poisoned")]
    Poisoned,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Remote Service Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse classification of a remote failure.
///
/// The reconciler retries both kinds on the next trigger; the split exists so
/// callers that surface errors to a user can word them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Transport error calling {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    #[error("Server returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {endpoint}: {details}")]
    Decode { endpoint: String, details: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: i64 },
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Timeout { .. } | RemoteError::Transport { .. } => FailureKind::Transient,
            RemoteError::Status { status, .. } if *status >= 500 || *status == 429 => {
                FailureKind::Transient
            }
            RemoteError::Status { .. } | RemoteError::Decode { .. } | RemoteError::NotFound { .. } => {
                FailureKind::Permanent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Account Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("already registered (user_id={0})")]
    AlreadyRegistered(i64),

    #[error("no registered user")]
    NotRegistered,

    #[error("Wi-Fi information is required")]
    MissingNetwork,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
