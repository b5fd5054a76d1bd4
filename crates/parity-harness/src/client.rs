//! HTTP probe client for parity runs

use crate::error::HarnessResult;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Timeout applied to every case request
pub const CASE_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout applied to each readiness probe
pub const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between readiness probes
pub const READY_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a single GET, whatever happened on the wire.
///
/// `status == 0` iff `error` is non-empty: no HTTP status exists when the
/// exchange failed at the transport level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResult {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub error: String,
}

impl HttpResult {
    /// Build a transport-failure result
    pub fn transport_error(error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "transport error".to_string();
        }
        Self {
            status: 0,
            content_type: String::new(),
            body: String::new(),
            error,
        }
    }

    /// Build a completed-exchange result
    pub fn response(status: u16, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
            error: String::new(),
        }
    }

    /// True when no HTTP exchange completed
    pub fn is_transport_error(&self) -> bool {
        self.status == 0
    }

    /// True for 4xx/5xx statuses
    pub fn is_http_error(&self) -> bool {
        self.status >= 400
    }
}

/// Client bound to one service's base URL
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    name: String,
}

impl ServiceClient {
    /// Create a client for `base_url`, e.g. `http://127.0.0.1:19500`
    pub fn new(name: &str, base_url: &str) -> HarnessResult<Self> {
        let client = Client::builder().no_proxy().build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        })
    }

    /// Get the client name (for logging)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a request path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `path` relative to the base URL
    pub async fn get(&self, path: &str, timeout: Duration) -> HttpResult {
        fetch(&self.client, &self.url(path), timeout).await
    }

    /// Poll `path` until the service answers or `budget` elapses
    pub async fn wait_ready(&self, path: &str, budget: Duration) -> bool {
        poll_ready(&self.client, &self.url(path), budget).await
    }
}

/// Issue a single GET against `url` with its own client.
pub async fn probe(url: &str, timeout: Duration) -> HttpResult {
    match Client::builder().no_proxy().build() {
        Ok(client) => fetch(&client, url, timeout).await,
        Err(e) => HttpResult::transport_error(e.to_string()),
    }
}

/// Poll `url` until a status in `[200, 500)` is seen or `budget` elapses.
pub async fn wait_ready(url: &str, budget: Duration) -> bool {
    match Client::builder().no_proxy().build() {
        Ok(client) => poll_ready(&client, url, budget).await,
        Err(_) => false,
    }
}

async fn fetch(client: &Client, url: &str, timeout: Duration) -> HttpResult {
    trace!("GET {}", url);
    let response = match client.get(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("GET {} failed: {}", url, e);
            return HttpResult::transport_error(e.to_string());
        }
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();

    match response.bytes().await {
        Ok(raw) => HttpResult::response(status, content_type, String::from_utf8_lossy(&raw)),
        Err(e) => {
            debug!("GET {} body read failed: {}", url, e);
            HttpResult::transport_error(e.to_string())
        }
    }
}

async fn poll_ready(client: &Client, url: &str, budget: Duration) -> bool {
    let start = Instant::now();

    while start.elapsed() < budget {
        let res = fetch(client, url, READY_PROBE_TIMEOUT).await;
        if (200..500).contains(&res.status) {
            return true;
        }
        tokio::time::sleep(READY_INTERVAL).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer every connection with the same raw HTTP response
    async fn respond_with(raw: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 512];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let _ = stream.write_all(raw).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        format!("http://127.0.0.1:{}", port)
    }

    #[test]
    fn test_transport_error_always_has_message() {
        let res = HttpResult::transport_error("");
        assert_eq!(res.status, 0);
        assert!(!res.error.is_empty());
        assert!(res.is_transport_error());
    }

    #[test]
    fn test_response_has_no_error() {
        let res = HttpResult::response(404, "text/plain", "nope");
        assert!(res.error.is_empty());
        assert!(res.is_http_error());
        assert!(!res.is_transport_error());
    }

    #[tokio::test]
    async fn test_probe_refused_connection() {
        // Bind then drop to get a port that is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let res = probe(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(2)).await;
        assert_eq!(res.status, 0);
        assert!(!res.error.is_empty());
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn test_wait_ready_gives_up() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ready = wait_ready(
            &format!("http://127.0.0.1:{}/", port),
            Duration::from_millis(200),
        )
        .await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_replaced() {
        let base = respond_with(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\na\xffb").await;
        let res = probe(&format!("{}/sub", base), Duration::from_secs(2)).await;
        assert_eq!(res, HttpResult::response(200, "", "a\u{FFFD}b"));
    }

    #[tokio::test]
    async fn test_content_type_passed_through() {
        let base = respond_with(
            b"HTTP/1.1 500 Oops\r\nContent-Type: text/yaml; charset=utf-8\r\nContent-Length: 2\r\nConnection: close\r\n\r\nno",
        )
        .await;
        let client = ServiceClient::new("rs", &base).unwrap();
        let res = client.get("/", Duration::from_secs(2)).await;
        assert_eq!(res.status, 500);
        assert_eq!(res.content_type, "text/yaml; charset=utf-8");
        assert_eq!(res.body, "no");
        assert!(res.error.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_status_counts_as_ready() {
        let base = respond_with(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        assert!(wait_ready(&base, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_server_error_status_is_not_ready() {
        let base =
            respond_with(b"HTTP/1.1 503 Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let client = ServiceClient::new("orig", &base).unwrap();
        assert!(!client.wait_ready("/version", Duration::from_millis(300)).await);
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = ServiceClient::new("rs", "http://127.0.0.1:19501/").unwrap();
        assert_eq!(client.url("/version"), "http://127.0.0.1:19501/version");
        assert_eq!(client.name(), "rs");
    }
}
