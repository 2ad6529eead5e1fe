use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Mutex;

use super::SessionService;
use crate::error::RemoteError;
use crate::stats::{weekly_summary, WeeklyStats};
use crate::types::{server_offset, PresenceSession, UserIdentity};

#[derive(Debug, Default)]
struct Ledger {
    next_user_id: i64,
    next_session_id: i64,
    users: Vec<UserIdentity>,
    sessions: Vec<PresenceSession>,
}

/// Process-local stand-in for the presence server.
///
/// Follows the server's rules: starting a session for a user who already has
/// one open returns the open session, ending an unknown session is an error,
/// and deleting a user drops their sessions.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    ledger: Mutex<Ledger>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions ever recorded, open and closed.
    pub fn sessions(&self) -> Vec<PresenceSession> {
        self.ledger
            .lock()
            .map(|ledger| ledger.sessions.clone())
            .unwrap_or_default()
    }

    pub fn open_sessions(&self, user_id: i64) -> Vec<PresenceSession> {
        self.sessions()
            .into_iter()
            .filter(|session| session.user_id == user_id && session.is_open())
            .collect()
    }

    fn with_ledger<T>(
        &self,
        op: impl FnOnce(&mut Ledger) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut ledger = self.ledger.lock().map_err(|_| RemoteError::Transport {
            endpoint: "memory".to_string(),
            details: "ledger lock poisoned".to_string(),
        })?;
        op(&mut ledger)
    }
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&server_offset())
}

impl SessionService for InMemorySessionService {
    fn register_user(&self, ssid: &str, bssid: &str) -> Result<UserIdentity, RemoteError> {
        self.with_ledger(|ledger| {
            ledger.next_user_id += 1;
            let identity = UserIdentity {
                id: ledger.next_user_id,
                home_ssid: ssid.to_string(),
                home_bssid: bssid.to_string(),
            };
            ledger.users.push(identity.clone());
            Ok(identity)
        })
    }

    fn update_home_network(
        &self,
        user_id: i64,
        ssid: &str,
        bssid: &str,
    ) -> Result<UserIdentity, RemoteError> {
        self.with_ledger(|ledger| {
            let user = ledger
                .users
                .iter_mut()
                .find(|user| user.id == user_id)
                .ok_or(RemoteError::NotFound {
                    resource: "user",
                    id: user_id,
                })?;
            user.home_ssid = ssid.to_string();
            user.home_bssid = bssid.to_string();
            Ok(user.clone())
        })
    }

    fn delete_user(&self, user_id: i64) -> Result<UserIdentity, RemoteError> {
        self.with_ledger(|ledger| {
            let index = ledger
                .users
                .iter()
                .position(|user| user.id == user_id)
                .ok_or(RemoteError::NotFound {
                    resource: "user",
                    id: user_id,
                })?;
            ledger.sessions.retain(|session| session.user_id != user_id);
            Ok(ledger.users.remove(index))
        })
    }

    fn start_session(&self, user_id: i64) -> Result<PresenceSession, RemoteError> {
        self.with_ledger(|ledger| {
            if !ledger.users.iter().any(|user| user.id == user_id) {
                return Err(RemoteError::NotFound {
                    resource: "user",
                    id: user_id,
                });
            }
            if let Some(open) = ledger
                .sessions
                .iter()
                .find(|session| session.user_id == user_id && session.is_open())
            {
                return Ok(open.clone());
            }

            ledger.next_session_id += 1;
            let session = PresenceSession {
                id: ledger.next_session_id,
                user_id,
                opened_at: now(),
                closed_at: None,
            };
            ledger.sessions.push(session.clone());
            Ok(session)
        })
    }

    fn end_session(&self, session_id: i64) -> Result<PresenceSession, RemoteError> {
        self.with_ledger(|ledger| {
            let session = ledger
                .sessions
                .iter_mut()
                .find(|session| session.id == session_id)
                .ok_or(RemoteError::NotFound {
                    resource: "session",
                    id: session_id,
                })?;
            session.closed_at = Some(now());
            Ok(session.clone())
        })
    }

    fn weekly_stats(&self, user_id: i64) -> Result<WeeklyStats, RemoteError> {
        self.with_ledger(|ledger| {
            let sessions: Vec<PresenceSession> = ledger
                .sessions
                .iter()
                .filter(|session| session.user_id == user_id)
                .cloned()
                .collect();
            Ok(weekly_summary(&sessions, now()))
        })
    }
}
