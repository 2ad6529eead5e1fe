//! Named periodic timers.
//!
//! Each timer owns one thread that waits on a channel with a timeout; the
//! timeout is the tick, and dropping the sender cancels it. Registering a
//! name that is already taken follows [`ExistingTimerPolicy`], so a name never
//! has more than one live timer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingTimerPolicy {
    /// Leave the running timer alone.
    Keep,
    /// Cancel the running timer and start the new one.
    #[default]
    Replace,
}

struct TimerHandle {
    period: Duration,
    // Dropping this ends the timer thread at its next wakeup.
    _cancel: Sender<()>,
}

#[derive(Default)]
pub struct Scheduler {
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` every `period` (first run after one period).
    ///
    /// Returns `true` if a timer was started, `false` if `Keep` left an
    /// existing one in place.
    pub fn register<F>(
        &self,
        name: &str,
        period: Duration,
        policy: ExistingTimerPolicy,
        task: F,
    ) -> bool
    where
        F: Fn() + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let mut timers = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if timers.contains_key(name) && policy == ExistingTimerPolicy::Keep {
            debug!(timer = name, "Timer already registered; keeping it");
            return false;
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread_name = format!("timer-{}", name);
        let timer = name.to_string();
        let spawned = thread::Builder::new().name(thread_name).spawn(move || loop {
            match cancelled.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    debug!(timer = %timer, "Timer tick");
                    task();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!(timer = %timer, "Timer stopped");
                    break;
                }
            }
        });

        if let Err(err) = spawned {
            warn!(timer = name, error = %err, "Failed to spawn timer thread");
            return false;
        }

        let replaced = timers.insert(
            name.to_string(),
            TimerHandle {
                period,
                _cancel: cancel,
            },
        );
        info!(
            timer = name,
            period_secs = period.as_secs(),
            replaced = replaced.is_some(),
            "Registered timer"
        );
        true
    }

    /// Cancels a timer. A tick already running finishes first.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
        if removed.is_some() {
            info!(timer = name, "Unregistered timer");
        }
        removed.is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.timers
            .lock()
            .map(|timers| timers.contains_key(name))
            .unwrap_or(false)
    }

    pub fn period(&self, name: &str) -> Option<Duration> {
        self.timers
            .lock()
            .ok()
            .and_then(|timers| timers.get(name).map(|timer| timer.period))
    }

    pub fn shutdown(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = count.clone();
        (count, move || {
            task_count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn wait_for(count: &AtomicUsize, at_least: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn timer_ticks_repeatedly() {
        let scheduler = Scheduler::new();
        let (count, task) = counter();

        assert!(scheduler.register("tick", MIN_PERIOD, ExistingTimerPolicy::Replace, task));
        assert!(scheduler.is_registered("tick"));
        assert!(wait_for(&count, 2));
        scheduler.shutdown();
    }

    #[test]
    fn keep_leaves_existing_timer() {
        let scheduler = Scheduler::new();
        let (_first, first_task) = counter();
        let (second, second_task) = counter();

        assert!(scheduler.register("tick", MIN_PERIOD, ExistingTimerPolicy::Keep, first_task));
        assert!(!scheduler.register("tick", MIN_PERIOD, ExistingTimerPolicy::Keep, second_task));

        thread::sleep(MIN_PERIOD * 2 + Duration::from_millis(300));
        assert_eq!(second.load(Ordering::SeqCst), 0);
        scheduler.shutdown();
    }

    #[test]
    fn replace_swaps_the_task() {
        let scheduler = Scheduler::new();
        let (first, first_task) = counter();
        let (second, second_task) = counter();

        scheduler.register("tick", Duration::from_secs(3600), ExistingTimerPolicy::Replace, first_task);
        assert!(scheduler.register("tick", MIN_PERIOD, ExistingTimerPolicy::Replace, second_task));

        assert!(wait_for(&second, 1));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.period("tick"), Some(MIN_PERIOD));
        scheduler.shutdown();
    }

    #[test]
    fn unregister_stops_ticks() {
        let scheduler = Scheduler::new();
        let (count, task) = counter();

        scheduler.register("tick", MIN_PERIOD, ExistingTimerPolicy::Replace, task);
        assert!(scheduler.unregister("tick"));
        assert!(!scheduler.is_registered("tick"));
        assert!(!scheduler.unregister("tick"));

        thread::sleep(MIN_PERIOD + Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn period_is_clamped() {
        let scheduler = Scheduler::new();
        let (_count, task) = counter();
        scheduler.register("tick", Duration::ZERO, ExistingTimerPolicy::Replace, task);
        assert_eq!(scheduler.period("tick"), Some(MIN_PERIOD));
        scheduler.shutdown();
    }
}
