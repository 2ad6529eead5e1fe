//! IPC protocol types and validation for stayhomed.
//!
//! Shared by the daemon and the CLI so request shapes cannot drift. The daemon
//! is still the authority on validation; clients reuse the same types to build
//! requests that will pass it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// 802.11 caps an SSID at 32 octets.
pub const MAX_SSID_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    Refresh,
    NetworkAvailable,
    NetworkLost,
    SetForeground,
    RegisterHome,
    UpdateHome,
    DeleteUser,
    GetWeeklyStats,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ForegroundParams {
    pub foreground: bool,
}

/// Home network for `register_home` / `update_home`. Omitting both fields
/// asks the daemon to use the network it currently observes.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HomeNetworkParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
}

impl HomeNetworkParams {
    pub fn is_empty(&self) -> bool {
        self.ssid.is_none() && self.bssid.is_none()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.is_empty() {
            return Ok(());
        }

        let ssid = self.ssid.as_deref().unwrap_or_default();
        if ssid.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "ssid is required"));
        }
        if ssid.len() > MAX_SSID_BYTES {
            return Err(ErrorInfo::new(
                "invalid_ssid",
                format!("ssid must be {} bytes or fewer", MAX_SSID_BYTES),
            ));
        }

        match self.bssid.as_deref() {
            Some(bssid) if !is_mac_address(bssid) => Err(ErrorInfo::new(
                "invalid_bssid",
                "bssid must look like AA:BB:CC:DD:EE:FF",
            )),
            Some(_) => Ok(()),
            None => Err(ErrorInfo::new("missing_field", "bssid is required")),
        }
    }
}

pub fn parse_foreground(params: Option<Value>) -> Result<ForegroundParams, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("missing_params", "foreground is required"))?;
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("set_foreground payload is invalid: {}", err),
        )
    })
}

pub fn parse_home_network(params: Option<Value>) -> Result<HomeNetworkParams, ErrorInfo> {
    let parsed = match params {
        None | Some(Value::Null) => HomeNetworkParams::default(),
        Some(value) => serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_params",
                format!("home network payload is invalid: {}", err),
            )
        })?,
    };
    parsed.validate()?;
    Ok(parsed)
}

fn is_mac_address(value: &str) -> bool {
    let octets: Vec<&str> = value.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}
