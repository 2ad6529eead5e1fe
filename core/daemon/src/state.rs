//! Everything a request handler can reach.
//!
//! Owns the reconciler and its trigger sources. The periodic timer runs for
//! the life of the daemon; the connectivity watcher runs only while a client
//! has the daemon in foreground mode.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use stayhome_core::config::RuntimeConfig;
use stayhome_core::{
    Belief, ConnectivityWatcher, PresenceReconciler, ReconcileReport, Scheduler, WifiObservation,
};

pub struct DaemonState {
    reconciler: Arc<PresenceReconciler>,
    scheduler: Scheduler,
    watcher: Mutex<Option<ConnectivityWatcher>>,
    foreground: AtomicBool,
    config: RuntimeConfig,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub registered: bool,
    pub user_id: Option<i64>,
    pub home_ssid: Option<String>,
    pub home_bssid: Option<String>,
    pub belief: Belief,
    pub observation: WifiObservation,
    pub is_home: bool,
    pub match_policy: &'static str,
    pub foreground: bool,
    pub timer_registered: bool,
    pub last_report: Option<ReconcileReport>,
}

impl DaemonState {
    pub fn new(reconciler: Arc<PresenceReconciler>, config: RuntimeConfig) -> Self {
        Self {
            reconciler,
            scheduler: Scheduler::new(),
            watcher: Mutex::new(None),
            foreground: AtomicBool::new(false),
            config,
            started_at: Utc::now(),
        }
    }

    pub fn reconciler(&self) -> &PresenceReconciler {
        &self.reconciler
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn timer_registered(&self) -> bool {
        self.scheduler.is_registered(&self.config.timer.name)
    }

    /// Registers the periodic refresh if the config enables it.
    pub fn register_timer(&self) -> bool {
        let timer = &self.config.timer;
        if !timer.enabled {
            info!("Periodic refresh disabled by config");
            return false;
        }
        let reconciler = Arc::clone(&self.reconciler);
        self.scheduler
            .register(&timer.name, timer.cadence(), timer.policy, move || {
                reconciler.refresh();
            })
    }

    /// Entering foreground starts the connectivity watcher and refreshes once;
    /// leaving it stops the watcher. The timer is unaffected.
    pub fn set_foreground(&self, foreground: bool) -> Option<ReconcileReport> {
        let was = self.foreground.swap(foreground, Ordering::SeqCst);
        let mut watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if foreground {
            if watcher.is_none() {
                match ConnectivityWatcher::start(
                    Arc::clone(&self.reconciler),
                    self.config.connectivity.poll_interval(),
                ) {
                    Ok(started) => *watcher = Some(started),
                    Err(err) => warn!(error = %err, "Failed to start connectivity watcher"),
                }
            }
            drop(watcher);
            if !was {
                info!("Entered foreground mode");
            }
            Some(self.reconciler.refresh())
        } else {
            if let Some(mut running) = watcher.take() {
                running.stop();
            }
            if was {
                info!("Left foreground mode");
            }
            None
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.reconciler.state();
        let observation = self.reconciler.observe();
        let policy = self.reconciler.policy();
        let is_home = state
            .profile()
            .map(|profile| policy.is_home(&observation, &profile))
            .unwrap_or(false);

        StatusSnapshot {
            registered: state.user_id.is_some(),
            user_id: state.user_id,
            belief: state.belief(),
            home_ssid: state.home_ssid,
            home_bssid: state.home_bssid,
            observation,
            is_home,
            match_policy: policy.as_str(),
            foreground: self.is_foreground(),
            timer_registered: self.timer_registered(),
            last_report: self.reconciler.last_report(),
        }
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.set_foreground(false);
    }
}
