//! Reads the current Wi-Fi link into a [`WifiObservation`].
//!
//! Observers never fail outward. Missing tooling, missing privileges, a wired
//! primary link and "no network at all" all collapse into
//! [`WifiObservation::disconnected`]; telling them apart is the job of
//! whatever asks the user for permissions, not of the reconciler.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::WifiObservation;

const UNKNOWN_SSID: &str = "<unknown ssid>";
const MASKED_VALUE: &str = "--";
pub const DEFAULT_NMCLI_TIMEOUT_MS: u64 = 2_000;
const WAIT_POLL: Duration = Duration::from_millis(20);

pub trait NetworkObserver: Send + Sync {
    fn observe(&self) -> WifiObservation;
}

/// Observer backed by NetworkManager's `nmcli`.
#[derive(Debug, Clone)]
pub struct NmcliObserver {
    program: PathBuf,
    timeout: Duration,
}

impl Default for NmcliObserver {
    fn default() -> Self {
        Self::with_program(PathBuf::from("nmcli"))
    }
}

impl NmcliObserver {
    pub fn with_program(program: PathBuf) -> Self {
        Self {
            program,
            timeout: Duration::from_millis(DEFAULT_NMCLI_TIMEOUT_MS),
        }
    }

    /// Bounds each `nmcli` invocation; a call that runs longer is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| format!("Failed to run {}: {}", self.program.display(), err))?;

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(format!(
                            "{} timed out after {:?}",
                            self.program.display(),
                            self.timeout
                        ));
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(err) => {
                    let _ = child.kill();
                    return Err(format!("Failed to wait for {}: {}", self.program.display(), err));
                }
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            ));
        }

        let mut stdout = Vec::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_end(&mut stdout)
                .map_err(|err| format!("Failed to read {} output: {}", self.program.display(), err))?;
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn try_observe(&self) -> Result<WifiObservation, String> {
        let devices = self.run(&["-t", "-f", "TYPE,STATE", "device", "status"])?;
        if !has_connected_wifi_device(&devices) {
            return Ok(WifiObservation::disconnected());
        }

        let networks = self.run(&[
            "-t",
            "-e",
            "yes",
            "-f",
            "ACTIVE,SSID,BSSID",
            "device",
            "wifi",
            "list",
            "--rescan",
            "no",
        ])?;
        Ok(parse_active_wifi(&networks).unwrap_or_default())
    }
}

impl NetworkObserver for NmcliObserver {
    fn observe(&self) -> WifiObservation {
        match self.try_observe() {
            Ok(observation) => observation,
            Err(err) => {
                tracing::debug!(error = %err, "Wi-Fi observation unavailable");
                WifiObservation::disconnected()
            }
        }
    }
}

/// Observer that reports a configured link. Used for headless setups without
/// NetworkManager and for driving the daemon deterministically.
#[derive(Debug, Default)]
pub struct FixedObserver {
    current: Mutex<WifiObservation>,
}

impl FixedObserver {
    pub fn new(observation: WifiObservation) -> Self {
        Self {
            current: Mutex::new(observation),
        }
    }

    pub fn set(&self, observation: WifiObservation) {
        if let Ok(mut current) = self.current.lock() {
            *current = observation;
        }
    }
}

impl NetworkObserver for FixedObserver {
    fn observe(&self) -> WifiObservation {
        self.current
            .lock()
            .map(|current| normalize(current.clone()))
            .unwrap_or_default()
    }
}

fn has_connected_wifi_device(output: &str) -> bool {
    output.lines().any(|line| {
        let fields = split_terse(line);
        matches!(
            (fields.first().map(String::as_str), fields.get(1).map(String::as_str)),
            (Some("wifi"), Some("connected"))
        )
    })
}

/// Picks the active row out of `nmcli -t -e yes -f ACTIVE,SSID,BSSID` output.
pub fn parse_active_wifi(output: &str) -> Option<WifiObservation> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        if fields.first().map(String::as_str) != Some("yes") {
            return None;
        }
        let ssid = fields.get(1).cloned().unwrap_or_default();
        let bssid = fields.get(2).cloned().unwrap_or_default();
        Some(normalize(WifiObservation::connected(ssid, bssid)))
    })
}

/// Applies the same cleanup to every observer's output.
pub fn normalize(observation: WifiObservation) -> WifiObservation {
    if !observation.connected {
        return WifiObservation::disconnected();
    }

    let ssid = clean_ssid(&observation.ssid);
    if ssid.is_empty() {
        return WifiObservation::disconnected();
    }

    let bssid = observation.bssid.trim();
    let bssid = if bssid == MASKED_VALUE { "" } else { bssid };
    WifiObservation::connected(ssid, bssid)
}

fn clean_ssid(raw: &str) -> String {
    let trimmed = raw
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(raw);
    if trimmed == UNKNOWN_SSID || trimmed == MASKED_VALUE {
        String::new()
    } else {
        trimmed.to_string()
    }
}

// nmcli terse mode separates fields with ':' and escapes literal ':' and '\'.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
