//! HTTP liveness check

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};

use crate::error::{BerthError, Result};

/// Where a probe points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", host, self.port, path)
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    /// HTTP status, when a response arrived
    pub status: Option<u16>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ProbeResult {
    pub fn new(healthy: bool, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            healthy,
            status,
            message: message.into(),
            checked_at: Utc::now(),
            elapsed_ms: 0,
        }
    }
}

/// Something that can report liveness
pub trait HealthCheck: Send {
    fn check(&self) -> ProbeResult;
}

/// GET against the health endpoint; only a 2xx answer counts as healthy
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(target: &ProbeTarget) -> Result<Self> {
        let client = Client::builder()
            .timeout(target.timeout)
            .connect_timeout(target.timeout)
            .redirect(Policy::none())
            // the app is probed directly, never through HTTP_PROXY
            .no_proxy()
            .build()
            .map_err(|e| BerthError::ProbeError(e.to_string()))?;
        Ok(Self {
            client,
            url: target.url(),
            timeout: target.timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthCheck for HttpProbe {
    fn check(&self) -> ProbeResult {
        let started = Instant::now();
        let mut result = match self.client.get(&self.url).send() {
            Ok(response) => {
                let status = response.status();
                ProbeResult::new(
                    status.is_success(),
                    Some(status.as_u16()),
                    format!("GET {} -> {}", self.url, status),
                )
            }
            Err(e) if e.is_timeout() => ProbeResult::new(
                false,
                None,
                format!("GET {} timed out after {}s", self.url, self.timeout.as_secs_f32()),
            ),
            Err(e) if e.is_connect() => {
                ProbeResult::new(false, None, format!("GET {} failed to connect", self.url))
            }
            Err(e) => ProbeResult::new(false, None, format!("GET {} failed: {}", self.url, e)),
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answer one request with the given status line
    fn serve_once(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!("HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok", status_line);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    fn target(port: u16) -> ProbeTarget {
        ProbeTarget {
            host: "127.0.0.1".to_string(),
            port,
            path: "/_stcore/health".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_url() {
        assert_eq!(target(8501).url(), "http://127.0.0.1:8501/_stcore/health");
        let v6 = ProbeTarget {
            host: "::1".to_string(),
            path: "healthz".to_string(),
            ..target(80)
        };
        assert_eq!(v6.url(), "http://[::1]:80/healthz");
    }

    #[test]
    fn test_ok_is_healthy() {
        let port = serve_once("200 OK");
        let result = HttpProbe::new(&target(port)).unwrap().check();
        assert!(result.healthy, "{}", result.message);
        assert_eq!(result.status, Some(200));
    }

    #[test]
    fn test_error_status_is_unhealthy() {
        let port = serve_once("503 Service Unavailable");
        let result = HttpProbe::new(&target(port)).unwrap().check();
        assert!(!result.healthy);
        assert_eq!(result.status, Some(503));
    }

    #[test]
    fn test_redirect_is_unhealthy() {
        let port = serve_once("302 Found");
        let result = HttpProbe::new(&target(port)).unwrap().check();
        assert!(!result.healthy);
        assert_eq!(result.status, Some(302));
    }

    #[test]
    fn test_connection_refused_is_unhealthy() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = HttpProbe::new(&target(port)).unwrap().check();
        assert!(!result.healthy);
        assert_eq!(result.status, None);
    }
}
