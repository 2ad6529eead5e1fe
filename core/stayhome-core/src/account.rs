//! Account lifecycle: register, change home network, delete.
//!
//! These run on the reconciler so the cached identity and the reconciliation
//! state never drift apart. Registration and home changes reconcile right
//! away against a fresh observation.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::AccountError;
use crate::reconciler::{PresenceReconciler, ReconcileReport};
use crate::stats::WeeklyStats;
use crate::store;
use crate::types::{UserIdentity, WifiObservation};

/// Short outcome for a user-facing surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub ok: bool,
    pub message: String,
    pub user_id: Option<i64>,
}

impl AccountStatus {
    pub fn registered(identity: &UserIdentity) -> Self {
        Self {
            ok: true,
            message: format!("registered (user_id={})", identity.id),
            user_id: Some(identity.id),
        }
    }

    pub fn updated(identity: &UserIdentity) -> Self {
        Self {
            ok: true,
            message: format!("home network updated to {}", identity.home_ssid),
            user_id: Some(identity.id),
        }
    }

    pub fn deleted(identity: &UserIdentity) -> Self {
        Self {
            ok: true,
            message: format!("user {} deleted", identity.id),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    pub identity: UserIdentity,
    pub status: AccountStatus,
    /// Reconciliation run right after the change, if any.
    pub report: Option<ReconcileReport>,
}

impl PresenceReconciler {
    /// Registers `network` as home and starts tracking.
    pub fn register_home(&self, network: &WifiObservation) -> Result<AccountOutcome, AccountError> {
        if let Some(user_id) = self.state().user_id {
            return Err(AccountError::AlreadyRegistered(user_id));
        }
        let (ssid, bssid) = require_network(network)?;

        let identity = self.service().register_user(ssid, bssid)?;
        self.cache_identity(&identity);
        info!(user_id = identity.id, ssid = %identity.home_ssid, "Registered home network");

        let report = self.refresh();
        Ok(AccountOutcome {
            status: AccountStatus::registered(&identity),
            identity,
            report: Some(report),
        })
    }

    /// Replaces the home network of the registered user.
    ///
    /// An open session is left to the reconciliation that follows: if the
    /// device no longer matches the new profile, that pass ends it.
    pub fn update_home(&self, network: &WifiObservation) -> Result<AccountOutcome, AccountError> {
        let user_id = self.state().user_id.ok_or(AccountError::NotRegistered)?;
        let (ssid, bssid) = require_network(network)?;

        let identity = self.service().update_home_network(user_id, ssid, bssid)?;
        self.cache_identity(&identity);
        info!(user_id, ssid = %identity.home_ssid, "Updated home network");

        let report = self.refresh();
        Ok(AccountOutcome {
            status: AccountStatus::updated(&identity),
            identity,
            report: Some(report),
        })
    }

    /// Deletes the user remotely, then forgets everything locally.
    ///
    /// The server drops the user's sessions with the user, so no end call is
    /// made for an open session.
    pub fn delete_user(&self) -> Result<AccountOutcome, AccountError> {
        let user_id = self.state().user_id.ok_or(AccountError::NotRegistered)?;

        let identity = self.service().delete_user(user_id)?;
        if let Err(err) = self.forget_local_state() {
            warn!(user_id, error = %err, "Failed to clear deleted user from state store");
            return Err(err.into());
        }
        info!(user_id, "Deleted user");

        Ok(AccountOutcome {
            status: AccountStatus::deleted(&identity),
            identity,
            report: None,
        })
    }

    pub fn weekly_stats(&self) -> Result<WeeklyStats, AccountError> {
        let user_id = self.state().user_id.ok_or(AccountError::NotRegistered)?;
        Ok(self.service().weekly_stats(user_id)?)
    }

    fn cache_identity(&self, identity: &UserIdentity) {
        {
            let mut memory = self.memory();
            memory.user_id = Some(identity.id);
            memory.home_ssid = Some(identity.home_ssid.clone());
            memory.home_bssid = Some(identity.home_bssid.clone());
        }
        if let Err(err) = store::save_identity(self.store(), identity) {
            warn!(
                user_id = identity.id,
                error = %err,
                "Failed to persist identity; keeping it in memory"
            );
        }
    }
}

fn require_network(network: &WifiObservation) -> Result<(&str, &str), AccountError> {
    let ssid = network.ssid.trim();
    if ssid.is_empty() {
        return Err(AccountError::MissingNetwork);
    }
    Ok((ssid, network.bssid.trim()))
}
