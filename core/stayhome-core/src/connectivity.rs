//! Polls the observer and turns link changes into reconciler triggers.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::reconciler::PresenceReconciler;
use crate::types::WifiObservation;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Available,
    Lost,
}

/// Compares two polls. Moving between networks counts as a new network
/// becoming available.
pub fn detect_change(previous: &WifiObservation, current: &WifiObservation) -> Option<LinkEvent> {
    match (previous.connected, current.connected) {
        (false, true) => Some(LinkEvent::Available),
        (true, false) => Some(LinkEvent::Lost),
        (true, true)
            if previous.ssid != current.ssid
                || !previous.bssid.eq_ignore_ascii_case(&current.bssid) =>
        {
            Some(LinkEvent::Available)
        }
        _ => None,
    }
}

pub struct ConnectivityWatcher {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ConnectivityWatcher {
    /// Spawns the polling thread. The first poll only records a baseline.
    pub fn start(reconciler: Arc<PresenceReconciler>, interval: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("connectivity".to_string())
            .spawn(move || {
                let mut previous = reconciler.observe();
                info!(
                    connected = previous.connected,
                    interval_ms = interval.as_millis() as u64,
                    "Connectivity watcher started"
                );
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let current = reconciler.observe();
                    match detect_change(&previous, &current) {
                        Some(LinkEvent::Available) => {
                            debug!(ssid = %current.ssid, "Network available");
                            reconciler.on_network_available();
                        }
                        Some(LinkEvent::Lost) => {
                            debug!("Network lost");
                            reconciler.on_network_lost();
                        }
                        None => {}
                    }
                    previous = current;
                }
                debug!("Connectivity watcher stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Connectivity watcher thread panicked");
            }
        }
    }
}

impl Drop for ConnectivityWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
