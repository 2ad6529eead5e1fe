//! Decides whether an observed network is the registered home network.

use serde::{Deserialize, Serialize};

use crate::types::{HomeNetworkProfile, WifiObservation};

/// How an observation is compared against the home profile.
///
/// `Strict` requires both SSID and BSSID to match, so a different access point
/// advertising the same name is not home. `Lenient` accepts either one, which
/// tolerates BSSID rotation across mesh nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    Strict,
    Lenient,
}

impl MatchPolicy {
    pub fn is_home(self, observation: &WifiObservation, profile: &HomeNetworkProfile) -> bool {
        if !observation.connected || !profile.is_complete() {
            return false;
        }

        let ssid_matches = ssid_matches(&observation.ssid, &profile.ssid);
        let bssid_matches = bssid_matches(&observation.bssid, &profile.bssid);

        match self {
            MatchPolicy::Strict => ssid_matches && bssid_matches,
            MatchPolicy::Lenient => ssid_matches || bssid_matches,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchPolicy::Strict => "strict",
            MatchPolicy::Lenient => "lenient",
        }
    }
}

fn ssid_matches(observed: &str, home: &str) -> bool {
    !observed.is_empty() && observed == home
}

// BSSIDs are MAC addresses; platforms disagree on hex case.
fn bssid_matches(observed: &str, home: &str) -> bool {
    !observed.trim().is_empty() && observed.trim().eq_ignore_ascii_case(home.trim())
}
