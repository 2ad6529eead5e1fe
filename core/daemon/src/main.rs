//! stayhome daemon entrypoint.
//!
//! Owns the presence reconciler for this machine: a Unix socket listener for
//! CLI and dispatcher-script triggers, a periodic refresh timer, and an
//! optional connectivity watcher while in foreground mode.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde::Serialize;
use serde_json::Value;
use stayhome_core::config::RuntimeConfig;
use stayhome_core::{
    load_runtime_config, AccountError, FixedObserver, HttpSessionService, InMemorySessionService,
    NetworkObserver, NmcliObserver, ObserverKind, PresenceReconciler, RemoteKind, SessionService,
    SqliteStore, StoragePaths, WifiObservation,
};
use stayhome_daemon_protocol::{
    parse_foreground, parse_home_network, ErrorInfo, HomeNetworkParams, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod state;

use state::DaemonState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let paths = match StoragePaths::discover() {
        Ok(paths) => paths,
        Err(err) => {
            error!(error = %err, "Failed to resolve stayhome directory");
            std::process::exit(1);
        }
    };

    let config = match load_runtime_config(Some(paths.config_file())) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            RuntimeConfig::default()
        }
    };

    let socket_path = paths.socket_path();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let store = match SqliteStore::new(paths.state_db()) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize state store");
            std::process::exit(1);
        }
    };

    let reconciler = Arc::new(PresenceReconciler::new(
        build_remote(&config),
        Arc::new(store),
        build_observer(&config),
        config.matching.policy,
    ));
    info!(
        remote = ?config.remote.kind,
        observer = ?config.observer.kind,
        policy = config.matching.policy.as_str(),
        cadence_secs = config.timer.cadence_secs,
        "Runtime config loaded"
    );

    let watch_on_start = config.connectivity.watch_on_start;
    let state = Arc::new(DaemonState::new(reconciler, config));
    state.register_timer();

    // Catch up on whatever changed while the daemon was down.
    if watch_on_start {
        state.set_foreground(true);
    } else {
        state.reconciler().refresh();
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "stayhome daemon started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }

    state.shutdown();
}

fn init_logging() {
    let debug_enabled = env::var("STAYHOME_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_remote(config: &RuntimeConfig) -> Arc<dyn SessionService> {
    match config.remote.kind {
        RemoteKind::Http => {
            info!(base_url = %config.remote.base_url, "Using HTTP presence server");
            Arc::new(HttpSessionService::new(&config.remote.http()))
        }
        RemoteKind::Memory => {
            warn!("Using in-process presence ledger; sessions are not persisted remotely");
            Arc::new(InMemorySessionService::new())
        }
    }
}

fn build_observer(config: &RuntimeConfig) -> Arc<dyn NetworkObserver> {
    match config.observer.kind {
        ObserverKind::Nmcli => Arc::new(
            NmcliObserver::with_program(config.observer.nmcli_path.clone())
                .with_timeout(config.observer.nmcli_timeout()),
        ),
        ObserverKind::Fixed => Arc::new(FixedObserver::new(config.observer.fixed_observation())),
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &DaemonState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let reconciler = state.reconciler();

    match request.method {
        Method::GetHealth => Response::ok(
            id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "started_at": state.started_at().to_rfc3339(),
                "timer_registered": state.timer_registered(),
                "foreground": state.is_foreground(),
            }),
        ),
        Method::GetStatus => to_response(id, "status", &state.status()),
        Method::Refresh => to_response(id, "report", &reconciler.refresh()),
        Method::NetworkAvailable => to_response(id, "report", &reconciler.on_network_available()),
        Method::NetworkLost => to_response(id, "report", &reconciler.on_network_lost()),
        Method::SetForeground => match parse_foreground(request.params) {
            Ok(params) => {
                let report = state.set_foreground(params.foreground);
                to_response(
                    id,
                    "foreground",
                    &serde_json::json!({
                        "foreground": params.foreground,
                        "report": report,
                    }),
                )
            }
            Err(err) => Response::error_with_info(id, err),
        },
        Method::RegisterHome => match home_network(request.params, state) {
            Ok(network) => account_response(id, reconciler.register_home(&network)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::UpdateHome => match home_network(request.params, state) {
            Ok(network) => account_response(id, reconciler.update_home(&network)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::DeleteUser => account_response(id, reconciler.delete_user()),
        Method::GetWeeklyStats => match reconciler.weekly_stats() {
            Ok(stats) => to_response(id, "weekly stats", &stats),
            Err(err) => Response::error_with_info(id, account_error(&err)),
        },
    }
}

/// Explicit params win; otherwise the network the daemon is on right now.
fn home_network(params: Option<Value>, state: &DaemonState) -> Result<WifiObservation, ErrorInfo> {
    let params: HomeNetworkParams = parse_home_network(params)?;
    match (params.ssid, params.bssid) {
        (Some(ssid), Some(bssid)) => Ok(WifiObservation::connected(ssid, bssid)),
        _ => Ok(state.reconciler().observe()),
    }
}

fn account_response<T: Serialize>(id: Option<String>, result: Result<T, AccountError>) -> Response {
    match result {
        Ok(outcome) => to_response(id, "account outcome", &outcome),
        Err(err) => {
            warn!(error = %err, "Account operation failed");
            Response::error_with_info(id, account_error(&err))
        }
    }
}

fn account_error(err: &AccountError) -> ErrorInfo {
    let code = match err {
        AccountError::AlreadyRegistered(_) => "already_registered",
        AccountError::NotRegistered => "not_registered",
        AccountError::MissingNetwork => "missing_network",
        AccountError::Remote(remote) if remote.is_transient() => "remote_unavailable",
        AccountError::Remote(_) => "remote_rejected",
        AccountError::Store(_) => "store_error",
    };
    ErrorInfo::new(code, err.to_string())
}

fn to_response<T: Serialize>(id: Option<String>, what: &str, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stayhome_core::{MatchPolicy, MemoryStore};

    fn state_with(observation: WifiObservation) -> DaemonState {
        let reconciler = Arc::new(PresenceReconciler::new(
            Arc::new(InMemorySessionService::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedObserver::new(observation)),
            MatchPolicy::Strict,
        ));
        DaemonState::new(reconciler, RuntimeConfig::default())
    }

    fn request(method: Method, params: Option<Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("test".to_string()),
            params,
        }
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let state = state_with(WifiObservation::disconnected());
        let mut req = request(Method::GetHealth, None);
        req.protocol_version = 99;

        let response = handle_request(req, &state);
        assert!(!response.ok);
        assert_eq!(response.error.expect("error").code, "protocol_mismatch");
    }

    #[test]
    fn register_uses_observed_network_when_params_omitted() {
        let state = state_with(WifiObservation::connected("Home", "AA:BB:CC:DD:EE:FF"));

        let response = handle_request(request(Method::RegisterHome, None), &state);
        assert!(response.ok, "register failed: {:?}", response.error);
        let data = response.data.expect("data");
        assert_eq!(data["identity"]["home_ssid"], "Home");
        assert_eq!(data["report"]["action"]["action"], "started");
    }

    #[test]
    fn register_without_network_is_an_account_error() {
        let state = state_with(WifiObservation::disconnected());
        let response = handle_request(request(Method::RegisterHome, None), &state);
        assert_eq!(response.error.expect("error").code, "missing_network");
    }

    #[test]
    fn stats_require_registration() {
        let state = state_with(WifiObservation::disconnected());
        let response = handle_request(request(Method::GetWeeklyStats, None), &state);
        assert_eq!(response.error.expect("error").code, "not_registered");
    }

    #[test]
    fn network_lost_reports_idle() {
        let state = state_with(WifiObservation::disconnected());
        let response = handle_request(request(Method::NetworkLost, None), &state);
        let data = response.data.expect("data");
        assert_eq!(data["belief"]["state"], "idle");
    }
}
