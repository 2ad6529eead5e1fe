//! Remote presence service: user registration and session bookkeeping.

mod http;
mod memory;

pub use http::{
    HttpConfig, HttpSessionService, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS,
};
pub use memory::InMemorySessionService;

use crate::error::RemoteError;
use crate::stats::WeeklyStats;
use crate::types::{PresenceSession, UserIdentity};

/// Every call is a network round trip and may fail; none of them is assumed
/// to be idempotent.
pub trait SessionService: Send + Sync {
    fn register_user(&self, ssid: &str, bssid: &str) -> Result<UserIdentity, RemoteError>;

    fn update_home_network(
        &self,
        user_id: i64,
        ssid: &str,
        bssid: &str,
    ) -> Result<UserIdentity, RemoteError>;

    fn delete_user(&self, user_id: i64) -> Result<UserIdentity, RemoteError>;

    fn start_session(&self, user_id: i64) -> Result<PresenceSession, RemoteError>;

    fn end_session(&self, session_id: i64) -> Result<PresenceSession, RemoteError>;

    fn weekly_stats(&self, user_id: i64) -> Result<WeeklyStats, RemoteError>;
}
