//! Presence reconciliation: decides and executes session start/end.
//!
//! Every trigger (manual refresh, connectivity change, timer tick) funnels
//! into [`PresenceReconciler::reconcile`]. A pass is:
//!
//! 1. load [`ReconciliationState`] from the durable store, falling back to
//!    the in-memory copy where the store failed,
//! 2. [`plan`] a transition from that state and the observation,
//! 3. execute at most one remote call, then write the outcome locally.
//!
//! There is no lock across triggers. Two things keep concurrent passes from
//! opening duplicate sessions: the open-session guard is re-read from durable
//! storage immediately before `start_session`, and only one transition may be
//! in flight per reconciler at a time (a pass that finds one in flight holds
//! and leaves the decision to the next trigger). The durable write is always
//! the last step of a branch, so a crash between the remote call and the write
//! leaves a divergence the next pass repairs by re-reading.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{FailureKind, StoreError};
use crate::matching::MatchPolicy;
use crate::observer::NetworkObserver;
use crate::remote::SessionService;
use crate::store::{self, StateStore};
use crate::types::{Belief, ReconciliationState, WifiObservation};

/// Why a pass decided not to call the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    AlreadyPresent,
    AlreadyIdle,
    NotRegistered,
}

/// The transition a pass intends to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum Plan {
    Start { user_id: i64 },
    End { log_id: i64 },
    Hold { reason: HoldReason },
}

/// What a pass actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    None,
    Started { log_id: i64 },
    Ended { log_id: i64 },
    /// Another trigger recorded an open session between planning and starting.
    StartRaced { log_id: i64 },
    /// Another trigger's transition was still in flight.
    Busy,
    StartFailed { kind: FailureKind },
    EndFailed { log_id: i64, kind: FailureKind },
}

impl Action {
    pub fn called_remote(&self) -> bool {
        matches!(
            self,
            Action::Started { .. }
                | Action::Ended { .. }
                | Action::StartFailed { .. }
                | Action::EndFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub observation: WifiObservation,
    pub is_home: bool,
    pub plan: Plan,
    pub action: Action,
    pub belief: Belief,
    pub completed_at: DateTime<Utc>,
}

/// Chooses a transition. Pure; no I/O.
///
/// Returns whether the observation counts as home alongside the plan. A
/// partial or missing home profile is never home, so a known session is
/// ended even for a user whose registration was lost.
pub fn plan(
    state: &ReconciliationState,
    observation: &WifiObservation,
    policy: MatchPolicy,
) -> (bool, Plan) {
    let is_home = state
        .profile()
        .map(|profile| policy.is_home(observation, &profile))
        .unwrap_or(false);

    let plan = match (is_home, state.current_log_id, state.user_id) {
        (true, Some(_), _) => Plan::Hold {
            reason: HoldReason::AlreadyPresent,
        },
        (true, None, Some(user_id)) => Plan::Start { user_id },
        (true, None, None) => Plan::Hold {
            reason: HoldReason::NotRegistered,
        },
        (false, Some(log_id), _) => Plan::End { log_id },
        (false, None, _) => Plan::Hold {
            reason: HoldReason::AlreadyIdle,
        },
    };

    (is_home, plan)
}

pub struct PresenceReconciler {
    service: Arc<dyn SessionService>,
    store: Arc<dyn StateStore>,
    observer: Arc<dyn NetworkObserver>,
    policy: MatchPolicy,
    memory: Mutex<ReconciliationState>,
    /// Set while memory holds a session id change the store rejected.
    log_id_unsaved: AtomicBool,
    transition_in_flight: AtomicBool,
    last_report: Mutex<Option<ReconcileReport>>,
}

/// Releases the single-flight claim when the transition finishes.
struct TransitionClaim<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TransitionClaim<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl PresenceReconciler {
    pub fn new(
        service: Arc<dyn SessionService>,
        store: Arc<dyn StateStore>,
        observer: Arc<dyn NetworkObserver>,
        policy: MatchPolicy,
    ) -> Self {
        let memory = store::load_state(store.as_ref());
        debug!(
            user_id = ?memory.user_id,
            current_log_id = ?memory.current_log_id,
            "Reconciler loaded durable state"
        );
        Self {
            service,
            store,
            observer,
            policy,
            memory: Mutex::new(memory),
            log_id_unsaved: AtomicBool::new(false),
            transition_in_flight: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn observe(&self) -> WifiObservation {
        self.observer.observe()
    }

    /// Current state: durable values, with gaps filled from memory.
    ///
    /// The open session id is read from the store under the memory lock, so
    /// it never mixes with a half-finished write. Memory only stands in for
    /// it when the read fails or the store rejected the last write.
    pub fn state(&self) -> ReconciliationState {
        let durable = store::load_state(self.store.as_ref());
        let memory = self.memory();
        ReconciliationState {
            current_log_id: self.recorded_log_id(&memory),
            ..durable.or(&memory)
        }
    }

    pub fn belief(&self) -> Belief {
        self.state().belief()
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        lock(&self.last_report).clone()
    }

    /// Observes the network and reconciles. Used by manual refresh and timer
    /// ticks.
    pub fn refresh(&self) -> ReconcileReport {
        let observation = self.observer.observe();
        self.reconcile(&observation)
    }

    /// A wireless network became available.
    pub fn on_network_available(&self) -> ReconcileReport {
        self.refresh()
    }

    /// The wireless link went away. Losing the link is never home, so this
    /// ends an open session without consulting the observer.
    pub fn on_network_lost(&self) -> ReconcileReport {
        self.reconcile(&WifiObservation::disconnected())
    }

    /// Runs one transition evaluation. Never fails; failures leave the
    /// belief unchanged for the next trigger to retry.
    pub fn reconcile(&self, observation: &WifiObservation) -> ReconcileReport {
        let state = self.state();
        let (is_home, plan) = plan(&state, observation, self.policy);

        let action = match plan {
            Plan::Start { user_id } => self.start(user_id),
            Plan::End { log_id } => self.end(log_id),
            Plan::Hold { reason } => {
                debug!(?reason, is_home, "No presence transition");
                Action::None
            }
        };

        let report = ReconcileReport {
            observation: observation.clone(),
            is_home,
            plan,
            action,
            belief: self.belief(),
            completed_at: Utc::now(),
        };
        *lock(&self.last_report) = Some(report.clone());
        report
    }

    fn start(&self, user_id: i64) -> Action {
        let Some(_claim) = self.claim_transition() else {
            debug!(user_id, "Start skipped; another transition is in flight");
            return Action::Busy;
        };

        {
            let mut memory = self.memory();
            if let Some(log_id) = self.recorded_log_id(&memory) {
                debug!(user_id, log_id, "Start skipped; session already recorded");
                memory.current_log_id = Some(log_id);
                return Action::StartRaced { log_id };
            }
        }

        match self.service.start_session(user_id) {
            Ok(session) => {
                self.record_log_id(Some(session.id));
                info!(user_id, log_id = session.id, "Presence session started");
                Action::Started { log_id: session.id }
            }
            Err(err) => {
                warn!(
                    user_id,
                    kind = ?err.kind(),
                    error = %err,
                    "Failed to start presence session; will retry on next trigger"
                );
                Action::StartFailed { kind: err.kind() }
            }
        }
    }

    fn end(&self, log_id: i64) -> Action {
        let Some(_claim) = self.claim_transition() else {
            debug!(log_id, "End skipped; another transition is in flight");
            return Action::Busy;
        };

        let recorded = self.recorded_log_id(&self.memory());
        if recorded != Some(log_id) {
            debug!(log_id, ?recorded, "End skipped; session already closed");
            return Action::None;
        }

        match self.service.end_session(log_id) {
            Ok(_) => {
                self.record_log_id(None);
                info!(log_id, "Presence session ended");
                Action::Ended { log_id }
            }
            Err(err) => {
                warn!(
                    log_id,
                    kind = ?err.kind(),
                    error = %err,
                    "Failed to end presence session; will retry the same session"
                );
                Action::EndFailed {
                    log_id,
                    kind: err.kind(),
                }
            }
        }
    }

    /// The open session id as recorded now. Call with the memory lock held.
    fn recorded_log_id(&self, memory: &ReconciliationState) -> Option<i64> {
        if self.log_id_unsaved.load(Ordering::Acquire) {
            return memory.current_log_id;
        }
        match store::try_load_current_log_id(self.store.as_ref()) {
            Ok(log_id) => log_id,
            Err(err) => {
                debug!(error = %err, "Session id read failed; using in-memory copy");
                memory.current_log_id
            }
        }
    }

    /// Writes the open session id to memory and the store together, under
    /// the memory lock.
    fn record_log_id(&self, log_id: Option<i64>) {
        let mut memory = self.memory();
        let result = match log_id {
            Some(id) => store::save_current_log_id(self.store.as_ref(), id),
            None => store::clear_current_log_id(self.store.as_ref()),
        };
        memory.current_log_id = log_id;
        self.log_id_unsaved.store(result.is_err(), Ordering::Release);
        if let Err(err) = result {
            warn!(
                ?log_id,
                error = %err,
                "Failed to write session id to state store; keeping it in memory"
            );
        }
    }

    /// Clears identity and session locally, memory and store together.
    pub(crate) fn forget_local_state(&self) -> Result<(), StoreError> {
        let mut memory = self.memory();
        let result = store::clear_identity(self.store.as_ref());
        *memory = ReconciliationState::default();
        self.log_id_unsaved.store(result.is_err(), Ordering::Release);
        result
    }

    fn claim_transition(&self) -> Option<TransitionClaim<'_>> {
        self.transition_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransitionClaim {
                flag: &self.transition_in_flight,
            })
    }

    pub(crate) fn memory(&self) -> MutexGuard<'_, ReconciliationState> {
        lock(&self.memory)
    }

    pub(crate) fn service(&self) -> &dyn SessionService {
        self.service.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }
}

// A panic mid-update cannot leave ReconciliationState half-written (plain
// Option fields), so a poisoned lock is still safe to read.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
