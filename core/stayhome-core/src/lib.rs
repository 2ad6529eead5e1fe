//! # stayhome-core
//!
//! Tracks time spent at home by watching which Wi-Fi network the machine is
//! on and keeping a remote presence session open exactly while it matches the
//! registered home network.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Triggers run on whatever thread fires them.
//! - **Reconcile, don't react**: Every trigger re-derives the transition from
//!   durable state plus a fresh observation; triggers carry no payload.
//! - **Failures keep the belief**: A failed remote call changes nothing locally,
//!   so the next trigger retries.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stayhome_core::{HttpConfig, HttpSessionService, MatchPolicy, NmcliObserver,
//!     PresenceReconciler, SqliteStore};
//!
//! let reconciler = PresenceReconciler::new(
//!     Arc::new(HttpSessionService::new(&HttpConfig::default())),
//!     Arc::new(SqliteStore::new(db_path)?),
//!     Arc::new(NmcliObserver::default()),
//!     MatchPolicy::Strict,
//! );
//! let report = reconciler.refresh();
//! ```

pub mod account;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod matching;
pub mod observer;
pub mod reconciler;
pub mod remote;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod store;
pub mod types;

pub use account::{AccountOutcome, AccountStatus};
pub use config::{load_runtime_config, ObserverKind, RemoteKind, RuntimeConfig};
pub use connectivity::{ConnectivityWatcher, LinkEvent};
pub use error::{AccountError, ConfigError, FailureKind, RemoteError, Result, StoreError};
pub use matching::MatchPolicy;
pub use observer::{FixedObserver, NetworkObserver, NmcliObserver};
pub use reconciler::{plan, Action, HoldReason, Plan, PresenceReconciler, ReconcileReport};
pub use remote::{HttpConfig, HttpSessionService, InMemorySessionService, SessionService};
pub use scheduler::{ExistingTimerPolicy, Scheduler};
pub use stats::{weekly_summary, WeeklyStats};
pub use storage::StoragePaths;
pub use store::{MemoryStore, SqliteStore, StateStore};
pub use types::{
    Belief, HomeNetworkProfile, PresenceSession, ReconciliationState, UserIdentity,
    WifiObservation,
};
