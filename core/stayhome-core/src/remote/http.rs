use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::SessionService;
use crate::error::RemoteError;
use crate::stats::WeeklyStats;
use crate::types::{PresenceSession, UserIdentity};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    /// Upper bound for a whole request, connect included. This is what keeps a
    /// timer tick from stalling.
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Serialize)]
struct HomeNetworkRequest<'a> {
    home_ssid: &'a str,
    home_bssid: &'a str,
}

#[derive(Serialize)]
struct StartSessionRequest {
    user_id: i64,
}

#[derive(Deserialize)]
struct UserResponse {
    id: i64,
    home_ssid: String,
    home_bssid: String,
}

impl From<UserResponse> for UserIdentity {
    fn from(response: UserResponse) -> Self {
        UserIdentity {
            id: response.id,
            home_ssid: response.home_ssid,
            home_bssid: response.home_bssid,
        }
    }
}

/// Blocking JSON client for the presence server.
pub struct HttpSessionService {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpSessionService {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        let base_url = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        Self { agent, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        result: Result<ureq::Response, ureq::Error>,
    ) -> Result<T, RemoteError> {
        match result {
            Ok(response) => response.into_json::<T>().map_err(|err| RemoteError::Decode {
                endpoint: endpoint.to_string(),
                details: err.to_string(),
            }),
            Err(ureq::Error::Status(status, response)) => {
                let body = response
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY_CHARS)
                    .collect();
                Err(RemoteError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                    body,
                })
            }
            Err(ureq::Error::Transport(err)) => Err(classify_transport(endpoint, &err)),
        }
    }
}

fn classify_transport(endpoint: &str, err: &ureq::Transport) -> RemoteError {
    let details = err.to_string();
    let timed_out = matches!(err.kind(), ureq::ErrorKind::Io)
        && details.to_ascii_lowercase().contains("timed out");
    if timed_out {
        RemoteError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        RemoteError::Transport {
            endpoint: endpoint.to_string(),
            details,
        }
    }
}

impl SessionService for HttpSessionService {
    fn register_user(&self, ssid: &str, bssid: &str) -> Result<UserIdentity, RemoteError> {
        let endpoint = "user/create";
        let result = self
            .agent
            .post(&self.url(endpoint))
            .send_json(HomeNetworkRequest {
                home_ssid: ssid,
                home_bssid: bssid,
            });
        self.execute::<UserResponse>(endpoint, result)
            .map(UserIdentity::from)
    }

    fn update_home_network(
        &self,
        user_id: i64,
        ssid: &str,
        bssid: &str,
    ) -> Result<UserIdentity, RemoteError> {
        let endpoint = format!("user/{}/home_wifi", user_id);
        let result = self
            .agent
            .put(&self.url(&endpoint))
            .send_json(HomeNetworkRequest {
                home_ssid: ssid,
                home_bssid: bssid,
            });
        self.execute::<UserResponse>(&endpoint, result)
            .map(UserIdentity::from)
    }

    fn delete_user(&self, user_id: i64) -> Result<UserIdentity, RemoteError> {
        let endpoint = format!("user/delete/{}", user_id);
        let result = self.agent.delete(&self.url(&endpoint)).call();
        self.execute::<UserResponse>(&endpoint, result)
            .map(UserIdentity::from)
    }

    fn start_session(&self, user_id: i64) -> Result<PresenceSession, RemoteError> {
        let endpoint = "log/start";
        let result = self
            .agent
            .post(&self.url(endpoint))
            .send_json(StartSessionRequest { user_id });
        self.execute(endpoint, result)
    }

    fn end_session(&self, session_id: i64) -> Result<PresenceSession, RemoteError> {
        let endpoint = "log/end";
        let result = self
            .agent
            .post(&self.url(endpoint))
            .query("log_id", &session_id.to_string())
            .call();
        self.execute(endpoint, result)
    }

    fn weekly_stats(&self, user_id: i64) -> Result<WeeklyStats, RemoteError> {
        let endpoint = format!("statistics/weekly/{}", user_id);
        let result = self.agent.get(&self.url(&endpoint)).call();
        self.execute(&endpoint, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves one canned HTTP response and hands back the raw request.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).expect("read");
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buffer);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .and_then(|value| value.trim().parse::<usize>().ok())
                        })
                        .unwrap_or(0);
                    if buffer.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&buffer).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn service(base_url: String) -> HttpSessionService {
        HttpSessionService::new(&HttpConfig {
            base_url,
            connect_timeout_ms: 1_000,
            timeout_ms: 2_000,
        })
    }

    #[test]
    fn start_session_posts_user_id() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"id":42,"user_id":7,"start_time":"2026-01-31T09:00:00+09:00","end_time":null}"#,
        );

        let session = service(base_url).start_session(7).expect("start session");
        let request = server.join().expect("server");

        assert_eq!(session.id, 42);
        assert!(request.starts_with("POST /log/start "));
        assert!(request.contains(r#""user_id":7"#));
    }

    #[test]
    fn end_session_passes_log_id_as_query() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"id":42,"user_id":7,"start_time":"2026-01-31T09:00:00","end_time":"2026-01-31T10:00:00"}"#,
        );

        let session = service(base_url).end_session(42).expect("end session");
        let request = server.join().expect("server");

        assert!(!session.is_open());
        assert!(request.starts_with("POST /log/end?log_id=42 "));
    }

    #[test]
    fn register_sends_home_network() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"id":7,"home_ssid":"Home","home_bssid":"AA:BB:CC:DD:EE:FF"}"#,
        );

        let identity = service(base_url)
            .register_user("Home", "AA:BB:CC:DD:EE:FF")
            .expect("register");
        let request = server.join().expect("server");

        assert_eq!(identity.id, 7);
        assert!(request.starts_with("POST /user/create "));
        assert!(request.contains(r#""home_ssid":"Home""#));
    }

    #[test]
    fn server_errors_are_typed_and_transient() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable",
            r#"{"detail":"maintenance"}"#,
        );

        let err = service(base_url).start_session(7).expect_err("should fail");
        server.join().expect("server");

        match &err {
            RemoteError::Status { status, body, .. } => {
                assert_eq!(*status, 503);
                assert!(body.contains("maintenance"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn undecodable_body_is_permanent() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", r#"{"unexpected":true}"#);

        let err = service(base_url).start_session(7).expect_err("should fail");
        server.join().expect("server");

        assert!(matches!(err, RemoteError::Decode { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = service(format!("http://{}", addr))
            .end_session(1)
            .expect_err("should fail");
        assert!(err.is_transient());
    }
}
