use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use stayhome_core::store::{self, KEY_CURRENT_LOG_ID};
use stayhome_core::types::server_offset;
use stayhome_core::{
    weekly_summary, Action, Belief, FixedObserver, MatchPolicy, MemoryStore, PresenceReconciler,
    PresenceSession, ReconciliationState, RemoteError, SessionService, SqliteStore, StateStore,
    StoreError, UserIdentity, WeeklyStats, WifiObservation,
};

const USER_ID: i64 = 7;

/// Session service that records every call and opens a new session on every
/// start, so duplicate starts show up as duplicate sessions.
#[derive(Default)]
struct CountingService {
    next_id: AtomicI64,
    starts: AtomicUsize,
    ends: Mutex<Vec<i64>>,
    fail_next_start: AtomicBool,
    fail_ends: AtomicBool,
    start_delay: Mutex<Duration>,
}

impl CountingService {
    fn starting_at(first_id: i64) -> Self {
        let service = Self::default();
        service.next_id.store(first_id, Ordering::SeqCst);
        service
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn ends(&self) -> Vec<i64> {
        self.ends.lock().expect("ends").clone()
    }

    fn unavailable() -> RemoteError {
        RemoteError::Timeout {
            endpoint: "test".to_string(),
        }
    }
}

impl SessionService for CountingService {
    fn register_user(&self, ssid: &str, bssid: &str) -> Result<UserIdentity, RemoteError> {
        Ok(UserIdentity {
            id: USER_ID,
            home_ssid: ssid.to_string(),
            home_bssid: bssid.to_string(),
        })
    }

    fn update_home_network(
        &self,
        user_id: i64,
        ssid: &str,
        bssid: &str,
    ) -> Result<UserIdentity, RemoteError> {
        Ok(UserIdentity {
            id: user_id,
            home_ssid: ssid.to_string(),
            home_bssid: bssid.to_string(),
        })
    }

    fn delete_user(&self, user_id: i64) -> Result<UserIdentity, RemoteError> {
        Ok(UserIdentity {
            id: user_id,
            home_ssid: String::new(),
            home_bssid: String::new(),
        })
    }

    fn start_session(&self, user_id: i64) -> Result<PresenceSession, RemoteError> {
        let delay = *self.start_delay.lock().expect("delay");
        thread::sleep(delay);
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(PresenceSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id,
            opened_at: Utc::now().with_timezone(&server_offset()),
            closed_at: None,
        })
    }

    fn end_session(&self, session_id: i64) -> Result<PresenceSession, RemoteError> {
        if self.fail_ends.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.ends.lock().expect("ends").push(session_id);
        let now = Utc::now().with_timezone(&server_offset());
        Ok(PresenceSession {
            id: session_id,
            user_id: USER_ID,
            opened_at: now,
            closed_at: Some(now),
        })
    }

    fn weekly_stats(&self, _user_id: i64) -> Result<WeeklyStats, RemoteError> {
        Ok(weekly_summary(&[], Utc::now().with_timezone(&server_offset())))
    }
}

/// Store whose writes always fail; reads see nothing.
struct ReadOnlyStore;

impl StateStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }

    fn clear(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
}

/// Memory-backed store whose `clear` takes a while, widening the window
/// between the remote end and the durable clear.
struct SlowClearStore {
    inner: MemoryStore,
    clear_delay: Duration,
}

impl StateStore for SlowClearStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        thread::sleep(self.clear_delay);
        self.inner.clear(key)
    }
}

fn home() -> WifiObservation {
    WifiObservation::connected("Home", "AA:BB:CC:DD:EE:FF")
}

fn away() -> WifiObservation {
    WifiObservation::connected("Office", "11:22:33:44:55:66")
}

fn registered(current_log_id: Option<i64>) -> ReconciliationState {
    ReconciliationState {
        user_id: Some(USER_ID),
        home_ssid: Some("Home".to_string()),
        home_bssid: Some("AA:BB:CC:DD:EE:FF".to_string()),
        current_log_id,
    }
}

fn reconciler_with(
    service: Arc<CountingService>,
    store: Arc<dyn StateStore>,
) -> PresenceReconciler {
    PresenceReconciler::new(
        service,
        store,
        Arc::new(FixedObserver::default()),
        MatchPolicy::Strict,
    )
}

#[test]
fn home_away_home_opens_two_sessions_and_closes_the_first() {
    let service = Arc::new(CountingService::starting_at(100));
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let reconciler = reconciler_with(service.clone(), store.clone());

    let offline = reconciler.reconcile(&WifiObservation::disconnected());
    assert_eq!(offline.action, Action::None);

    let first = reconciler.reconcile(&home());
    assert_eq!(first.action, Action::Started { log_id: 100 });

    let second = reconciler.reconcile(&away());
    assert_eq!(second.action, Action::Ended { log_id: 100 });
    assert_eq!(second.belief, Belief::Idle);

    let third = reconciler.reconcile(&home());
    assert_eq!(third.action, Action::Started { log_id: 101 });

    assert_eq!(service.starts(), 2);
    assert_eq!(service.ends(), vec![100]);
    assert_eq!(store::load_current_log_id(store.as_ref()), Some(101));
}

#[test]
fn repeated_triggers_in_a_stable_state_do_nothing() {
    let service = Arc::new(CountingService::starting_at(1));
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let reconciler = reconciler_with(service.clone(), store);

    reconciler.reconcile(&home());
    for _ in 0..5 {
        let report = reconciler.reconcile(&home());
        assert_eq!(report.action, Action::None);
        assert_eq!(report.belief, Belief::Present { log_id: 1 });
    }
    assert_eq!(service.starts(), 1);
}

#[test]
fn session_is_ended_at_most_once() {
    let service = Arc::new(CountingService::starting_at(1));
    let store = Arc::new(MemoryStore::with_state(&registered(Some(42))));
    let reconciler = reconciler_with(service.clone(), store);

    reconciler.on_network_lost();
    reconciler.on_network_lost();
    reconciler.reconcile(&away());

    assert_eq!(service.ends(), vec![42]);
}

#[test]
fn durable_log_id_is_ended_after_restart() {
    let service = Arc::new(CountingService::starting_at(1));
    let store = Arc::new(MemoryStore::with_state(&registered(Some(42))));

    // Fresh reconciler: its in-memory copy starts from the store alone.
    let reconciler = reconciler_with(service.clone(), store.clone());
    let report = reconciler.reconcile(&WifiObservation::disconnected());

    assert_eq!(report.action, Action::Ended { log_id: 42 });
    assert_eq!(service.ends(), vec![42]);
    assert_eq!(store.get(KEY_CURRENT_LOG_ID).expect("read"), None);
}

#[test]
fn sqlite_state_survives_process_restart() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let path = temp_dir.path().join("state.db");
    let service = Arc::new(CountingService::starting_at(500));

    {
        let store = Arc::new(SqliteStore::new(path.clone()).expect("store"));
        store
            .set_many(&[
                (store::KEY_USER_ID, "7"),
                (store::KEY_HOME_SSID, "Home"),
                (store::KEY_HOME_BSSID, "AA:BB:CC:DD:EE:FF"),
            ])
            .expect("seed");
        let reconciler = reconciler_with(service.clone(), store);
        assert_eq!(
            reconciler.reconcile(&home()).action,
            Action::Started { log_id: 500 }
        );
    }

    let store = Arc::new(SqliteStore::new(path).expect("reopen"));
    let reconciler = reconciler_with(service.clone(), store.clone());
    assert_eq!(reconciler.belief(), Belief::Present { log_id: 500 });

    // Still home after restart: no second session.
    assert_eq!(reconciler.reconcile(&home()).action, Action::None);
    assert_eq!(
        reconciler.reconcile(&away()).action,
        Action::Ended { log_id: 500 }
    );
    assert_eq!(service.starts(), 1);
    assert_eq!(store::load_current_log_id(store.as_ref()), None);
}

#[test]
fn failed_start_is_retried_on_next_trigger() {
    let service = Arc::new(CountingService::starting_at(1));
    service.fail_next_start.store(true, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let reconciler = reconciler_with(service.clone(), store);

    let failed = reconciler.reconcile(&home());
    assert!(matches!(failed.action, Action::StartFailed { .. }));
    assert_eq!(failed.belief, Belief::Idle);

    let retried = reconciler.reconcile(&home());
    assert_eq!(retried.action, Action::Started { log_id: 1 });
    assert_eq!(service.starts(), 1);
}

#[test]
fn failed_end_retries_the_same_session() {
    let service = Arc::new(CountingService::starting_at(1));
    service.fail_ends.store(true, Ordering::SeqCst);
    let store = Arc::new(MemoryStore::with_state(&registered(Some(42))));
    let reconciler = reconciler_with(service.clone(), store);

    assert!(matches!(
        reconciler.reconcile(&away()).action,
        Action::EndFailed { log_id: 42, .. }
    ));

    service.fail_ends.store(false, Ordering::SeqCst);
    assert_eq!(
        reconciler.reconcile(&away()).action,
        Action::Ended { log_id: 42 }
    );
    assert_eq!(service.ends(), vec![42]);
}

#[test]
fn memory_covers_for_a_store_that_rejects_writes() {
    let service = Arc::new(CountingService::starting_at(9));
    let reconciler = PresenceReconciler::new(
        service.clone(),
        Arc::new(ReadOnlyStore),
        Arc::new(FixedObserver::new(home())),
        MatchPolicy::Strict,
    );

    reconciler
        .register_home(&home())
        .expect("register despite store failure");
    assert_eq!(reconciler.belief(), Belief::Present { log_id: 9 });

    // A second trigger must not open another session.
    assert_eq!(reconciler.refresh().action, Action::None);
    assert_eq!(
        reconciler.on_network_lost().action,
        Action::Ended { log_id: 9 }
    );
    assert_eq!(service.starts(), 1);
}

#[test]
fn concurrent_triggers_open_at_most_one_session() {
    let service = Arc::new(CountingService::starting_at(1));
    *service.start_delay.lock().expect("delay") = Duration::from_millis(50);
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let reconciler = Arc::new(reconciler_with(service.clone(), store.clone()));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let reconciler = reconciler.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                reconciler.reconcile(&home())
            })
        })
        .collect();

    let started = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .filter(|report| matches!(report.action, Action::Started { .. }))
        .count();

    assert_eq!(started, 1);
    assert_eq!(service.starts(), 1);
    assert_eq!(store::load_current_log_id(store.as_ref()), Some(1));

    // Every later trigger sees the recorded session.
    assert_eq!(reconciler.reconcile(&home()).action, Action::None);
}

#[test]
fn lost_link_never_starts_a_session() {
    let service = Arc::new(CountingService::starting_at(1));
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let reconciler = reconciler_with(service.clone(), store);

    assert_eq!(reconciler.on_network_lost().action, Action::None);
    assert_eq!(service.starts(), 0);
}

#[test]
fn reading_state_during_an_end_does_not_revive_the_session() {
    let service = Arc::new(CountingService::starting_at(100));
    let store = Arc::new(SlowClearStore {
        inner: MemoryStore::with_state(&registered(Some(42))),
        clear_delay: Duration::from_millis(300),
    });
    let reconciler = Arc::new(reconciler_with(service.clone(), store.clone()));

    let ending = {
        let reconciler = reconciler.clone();
        thread::spawn(move || reconciler.on_network_lost())
    };
    thread::sleep(Duration::from_millis(100));
    // A status read racing the durable clear.
    let _ = reconciler.state();

    let lost = ending.join().expect("join");
    assert_eq!(lost.action, Action::Ended { log_id: 42 });
    assert_eq!(store::load_current_log_id(store.as_ref()), None);
    assert_eq!(reconciler.belief(), Belief::Idle);

    let back = reconciler.reconcile(&home());
    assert_eq!(back.action, Action::Started { log_id: 100 });
    assert_eq!(service.ends(), vec![42]);
}

#[test]
fn session_ended_by_another_process_is_not_held_open() {
    let service = Arc::new(CountingService::starting_at(1));
    let store = Arc::new(MemoryStore::with_state(&registered(None)));
    let first = reconciler_with(service.clone(), store.clone());
    assert_eq!(first.reconcile(&home()).action, Action::Started { log_id: 1 });

    let second = reconciler_with(service.clone(), store.clone());
    assert_eq!(second.on_network_lost().action, Action::Ended { log_id: 1 });

    assert_eq!(first.belief(), Belief::Idle);
    assert_eq!(first.reconcile(&home()).action, Action::Started { log_id: 2 });
    assert_eq!(service.ends(), vec![1]);
}
