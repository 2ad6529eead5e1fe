//! Daemon runtime configuration (`~/.stayhome/daemon/config.toml`).
//!
//! Every section and field is optional; a missing file means all defaults.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::matching::MatchPolicy;
use crate::remote::HttpConfig;
use crate::scheduler::ExistingTimerPolicy;
use crate::storage::StoragePaths;
use crate::types::WifiObservation;

pub const DEFAULT_TIMER_NAME: &str = "presence-refresh";
pub const DEFAULT_CADENCE_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Http,
    /// In-process ledger. Useful for local runs and tests without a server.
    Memory,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteConfig {
    #[serde(default)]
    pub kind: RemoteKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::default(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.base_url.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MatchingConfig {
    #[serde(default)]
    pub policy: MatchPolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timer_name")]
    pub name: String,
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    #[serde(default)]
    pub policy: ExistingTimerPolicy,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_timer_name(),
            cadence_secs: default_cadence_secs(),
            policy: ExistingTimerPolicy::default(),
        }
    }
}

impl TimerConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConnectivityConfig {
    #[serde(default = "default_true")]
    pub watch_on_start: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            watch_on_start: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ConnectivityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    #[default]
    Nmcli,
    /// Reports a configured observation; `refresh` never changes it.
    Fixed,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ObserverConfig {
    #[serde(default)]
    pub kind: ObserverKind,
    #[serde(default = "default_nmcli_path")]
    pub nmcli_path: PathBuf,
    #[serde(default = "default_nmcli_timeout_ms")]
    pub nmcli_timeout_ms: u64,
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub bssid: String,
    #[serde(default)]
    pub connected: bool,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            kind: ObserverKind::default(),
            nmcli_path: default_nmcli_path(),
            nmcli_timeout_ms: default_nmcli_timeout_ms(),
            ssid: String::new(),
            bssid: String::new(),
            connected: false,
        }
    }
}

impl ObserverConfig {
    pub fn nmcli_timeout(&self) -> Duration {
        Duration::from_millis(self.nmcli_timeout_ms)
    }

    pub fn fixed_observation(&self) -> WifiObservation {
        if self.connected {
            WifiObservation::connected(&self.ssid, &self.bssid)
        } else {
            WifiObservation::disconnected()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    crate::remote::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    crate::remote::DEFAULT_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    crate::remote::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_timer_name() -> String {
    DEFAULT_TIMER_NAME.to_string()
}

fn default_cadence_secs() -> u64 {
    DEFAULT_CADENCE_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_nmcli_path() -> PathBuf {
    PathBuf::from("nmcli")
}

fn default_nmcli_timeout_ms() -> u64 {
    crate::observer::DEFAULT_NMCLI_TIMEOUT_MS
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(StoragePaths::discover()?.config_file())
}

pub fn load_runtime_config(path: Option<PathBuf>) -> Result<RuntimeConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<RuntimeConfig>(&content).map_err(|err| ConfigError::Malformed {
        path: config_path,
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config =
            load_runtime_config(Some(temp_dir.path().join("missing.toml"))).expect("load config");

        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.remote.kind, RemoteKind::Http);
        assert_eq!(config.matching.policy, MatchPolicy::Strict);
        assert_eq!(config.timer.cadence_secs, 60);
        assert_eq!(config.timer.policy, ExistingTimerPolicy::Replace);
        assert!(config.connectivity.watch_on_start);
    }

    #[test]
    fn parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[remote]
kind = "memory"
timeout_ms = 2500

[matching]
policy = "lenient"

[timer]
cadence_secs = 900
policy = "keep"

[observer]
kind = "fixed"
ssid = "Home"
bssid = "AA:BB:CC:DD:EE:FF"
connected = true
"#,
        )
        .expect("write config");

        let config = load_runtime_config(Some(path)).expect("load config");
        assert_eq!(config.remote.kind, RemoteKind::Memory);
        assert_eq!(config.remote.timeout_ms, 2500);
        assert_eq!(config.remote.base_url, crate::remote::DEFAULT_BASE_URL);
        assert_eq!(config.matching.policy, MatchPolicy::Lenient);
        assert_eq!(config.timer.cadence(), Duration::from_secs(900));
        assert_eq!(config.timer.policy, ExistingTimerPolicy::Keep);
        assert!(config.timer.enabled);
        assert_eq!(
            config.observer.fixed_observation(),
            WifiObservation::connected("Home", "AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[timer]\ncadence_secs = \"soon\"\n").expect("write config");

        let err = load_runtime_config(Some(path)).expect_err("should fail");
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            "[connectivity]\npoll_interval_ms = 0\n\n[observer]\nnmcli_timeout_ms = 750\n",
        )
        .expect("write config");

        let config = load_runtime_config(Some(path)).expect("load config");
        assert_eq!(config.connectivity.poll_interval(), MIN_POLL_INTERVAL);
        assert_eq!(config.observer.nmcli_timeout(), Duration::from_millis(750));
        assert_eq!(
            ConnectivityConfig::default().poll_interval(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
    }
}
