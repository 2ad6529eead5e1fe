//! Client for the stayhome daemon socket.
//!
//! A request that never reached the daemon is retried once. A request the
//! daemon answered is never resent unless the method is read-only, since
//! account calls are not idempotent.

use chrono::Utc;
use rand::RngCore;
use stayhome_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "STAYHOME_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
// Covers a reconciliation that waits out the remote request timeout.
const READ_TIMEOUT_MS: u64 = 15_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon I/O failed: {0}")]
    Io(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

impl ClientError {
    fn is_retryable(&self, method: Method) -> bool {
        match self {
            ClientError::Connect { .. } => true,
            ClientError::Io(_) => is_read_only(method),
            ClientError::HomeDirNotFound | ClientError::Daemon { .. } => false,
        }
    }
}

fn is_read_only(method: Method) -> bool {
    matches!(
        method,
        Method::GetHealth | Method::GetStatus | Method::GetWeeklyStats
    )
}

/// Sends `method` and returns the response data.
pub fn call(method: Method, params: Option<serde_json::Value>) -> Result<serde_json::Value, ClientError> {
    let id = make_request_id();
    let build = || Request {
        id: Some(id.clone()),
        ..Request::new(method, params.clone())
    };

    match call_once(build()) {
        Ok(data) => Ok(data),
        Err(err) if err.is_retryable(method) => {
            tracing::warn!(error = %err, ?method, "Daemon request failed; retrying once");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            call_once(build()).inspect_err(|retry_err| {
                tracing::warn!(error = %retry_err, ?method, "Retry failed");
            })
        }
        Err(err) => Err(err),
    }
}

fn call_once(request: Request) -> Result<serde_json::Value, ClientError> {
    let response = send_request(&request)?;
    if response.ok {
        return Ok(response.data.unwrap_or(serde_json::Value::Null));
    }
    let (code, message) = response
        .error
        .map(|err| (err.code, err.message))
        .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
    Err(ClientError::Daemon { code, message })
}

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ClientError::HomeDirNotFound)?;
    Ok(home.join(".stayhome").join(SOCKET_NAME))
}

fn send_request(request: &Request) -> Result<Response, ClientError> {
    let path = socket_path()?;
    let mut stream = UnixStream::connect(&path).map_err(|source| ClientError::Connect {
        path: path.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| ClientError::Io(format!("Failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| ClientError::Io(format!("Failed to flush request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::Io("Response exceeded maximum size".to_string()));
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
                return Err(ClientError::Io(
                    "Timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => return Err(ClientError::Io(format!("Failed to read response: {}", err))),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Io("Daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Io(format!("Failed to parse response JSON: {}", err)))
}

fn make_request_id() -> String {
    let rand = rand::thread_rng().next_u64();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}
