//! Shared data model for presence tracking.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Offset the presence server records naive timestamps in (KST).
pub const SERVER_UTC_OFFSET_SECS: i32 = 9 * 3600;

pub fn server_offset() -> FixedOffset {
    FixedOffset::east_opt(SERVER_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// A user as known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub home_ssid: String,
    pub home_bssid: String,
}

impl UserIdentity {
    pub fn profile(&self) -> HomeNetworkProfile {
        HomeNetworkProfile::new(&self.home_ssid, &self.home_bssid)
    }
}

/// The fingerprint a device must match to count as home.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HomeNetworkProfile {
    pub ssid: String,
    pub bssid: String,
}

impl HomeNetworkProfile {
    pub fn new(ssid: impl Into<String>, bssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: bssid.into(),
        }
    }

    /// A profile counts only when both fields carry a value.
    pub fn is_complete(&self) -> bool {
        !self.ssid.trim().is_empty() && !self.bssid.trim().is_empty()
    }
}

/// One snapshot of the current link. Recomputed on every trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WifiObservation {
    pub ssid: String,
    pub bssid: String,
    pub connected: bool,
}

impl WifiObservation {
    pub fn connected(ssid: impl Into<String>, bssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: bssid.into(),
            connected: true,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// A server-side open/closed time span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSession {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "start_time", deserialize_with = "deserialize_timestamp")]
    pub opened_at: DateTime<FixedOffset>,
    #[serde(
        rename = "end_time",
        default,
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub closed_at: Option<DateTime<FixedOffset>>,
}

impl PresenceSession {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Parses RFC 3339, falling back to a naive timestamp in the server offset.
pub fn parse_server_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .and_then(|naive| server_offset().from_local_datetime(&naive).single())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_server_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_server_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
        None => Ok(None),
    }
}

/// Everything a trigger needs to decide a transition.
///
/// `current_log_id` is set if and only if this process believes a session is
/// open on the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconciliationState {
    pub user_id: Option<i64>,
    pub home_ssid: Option<String>,
    pub home_bssid: Option<String>,
    pub current_log_id: Option<i64>,
}

impl ReconciliationState {
    /// Home profile if both halves are present, `None` otherwise.
    pub fn profile(&self) -> Option<HomeNetworkProfile> {
        match (&self.home_ssid, &self.home_bssid) {
            (Some(ssid), Some(bssid)) => {
                let profile = HomeNetworkProfile::new(ssid, bssid);
                profile.is_complete().then_some(profile)
            }
            _ => None,
        }
    }

    pub fn belief(&self) -> Belief {
        match self.current_log_id {
            Some(log_id) => Belief::Present { log_id },
            None => Belief::Idle,
        }
    }

    /// Fills fields missing from `self` with the values in `fallback`.
    ///
    /// Durable state wins; the in-memory copy only covers reads that failed or
    /// writes that never landed.
    pub fn or(self, fallback: &ReconciliationState) -> ReconciliationState {
        let (home_ssid, home_bssid) = if self.profile().is_some() {
            (self.home_ssid, self.home_bssid)
        } else {
            (fallback.home_ssid.clone(), fallback.home_bssid.clone())
        };
        ReconciliationState {
            user_id: self.user_id.or(fallback.user_id),
            home_ssid,
            home_bssid,
            current_log_id: self.current_log_id.or(fallback.current_log_id),
        }
    }
}

/// What the local process believes about the user's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Belief {
    Idle,
    Present { log_id: i64 },
}

impl Belief {
    pub fn is_present(&self) -> bool {
        matches!(self, Belief::Present { .. })
    }

    pub fn log_id(&self) -> Option<i64> {
        match self {
            Belief::Present { log_id } => Some(*log_id),
            Belief::Idle => None,
        }
    }
}
