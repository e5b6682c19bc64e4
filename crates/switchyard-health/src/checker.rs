//! Single readiness check against an HTTP endpoint.
//!
//! A check passes only when the endpoint reports full readiness: a 2xx
//! response whose JSON `status` field, when present, is `"ready"`. A
//! liveness endpoint answering `{"status": "live"}` does not pass.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Limited};
use tracing::debug;

/// Upper bound on the readiness body we are willing to buffer.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Result of a single readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// 2xx and the body reports readiness.
    Ready,
    /// The endpoint answered but is not ready (non-2xx, or still initializing).
    NotReady,
    /// The check could not be executed (bad URL, connection error, timeout).
    Failed,
}

/// Outcome of one check, with enough detail to explain a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub result: ProbeResult,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl ProbeAttempt {
    pub fn ready(status: u16) -> Self {
        Self {
            result: ProbeResult::Ready,
            status: Some(status),
            detail: None,
        }
    }

    pub fn not_ready(status: u16, detail: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::NotReady,
            status: Some(status),
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::Failed,
            status: None,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.result == ProbeResult::Ready
    }
}

/// Decide readiness from a response status and body.
pub fn classify_readiness(status: u16, body: &[u8]) -> ProbeAttempt {
    let parsed = serde_json::from_slice::<serde_json::Value>(body).ok();
    let reported = parsed
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(|s| s.as_str());

    if !(200..300).contains(&status) {
        let mut detail = format!("HTTP {status}");
        if let Some(reported) = reported {
            detail.push_str(&format!(" ({reported})"));
        }
        if let Some(errors) = parsed
            .as_ref()
            .and_then(|v| v.get("errors"))
            .and_then(|e| e.as_array())
        {
            let errors: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !errors.is_empty() {
                detail.push_str(": ");
                detail.push_str(&errors.join("; "));
            }
        }
        return ProbeAttempt::not_ready(status, detail);
    }

    match reported {
        None | Some("ready") => ProbeAttempt::ready(status),
        Some(other) => ProbeAttempt::not_ready(
            status,
            format!("endpoint reports status {other:?}, expected \"ready\""),
        ),
    }
}

/// Perform one readiness check against `url` (plain `http://` only).
///
/// Never returns an error: connection problems and timeouts become a
/// `Failed` attempt.
pub async fn http_check(url: &str, timeout: Duration) -> ProbeAttempt {
    let uri: http::Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => return ProbeAttempt::failed(format!("invalid url {url:?}: {e}")),
    };
    if uri.scheme_str() != Some("http") {
        return ProbeAttempt::failed(format!("unsupported url {url:?}: only http:// targets"));
    }
    let Some(host) = uri.host() else {
        return ProbeAttempt::failed(format!("invalid url {url:?}: missing host"));
    };
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    match tokio::time::timeout(timeout, request(&address, &path, url)).await {
        Ok(attempt) => attempt,
        Err(_) => {
            debug!(%url, ?timeout, "readiness check timed out");
            ProbeAttempt::failed(format!("timed out after {}ms", timeout.as_millis()))
        }
    }
}

async fn request(address: &str, path: &str, url: &str) -> ProbeAttempt {
    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %url, "readiness check connection failed");
            return ProbeAttempt::failed(format!("connection to {address} failed: {e}"));
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %url, "readiness check handshake failed");
            return ProbeAttempt::failed(format!("handshake with {address} failed: {e}"));
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = match http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", address)
        .header("user-agent", concat!("switchyard/", env!("CARGO_PKG_VERSION")))
        .header("accept", "application/json")
        .body(Empty::<Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => return ProbeAttempt::failed(format!("invalid request for {url}: {e}")),
    };

    let resp = match sender.send_request(req).await {
        Ok(resp) => resp,
        Err(e) => {
            debug!(error = %e, %url, "readiness check request failed");
            return ProbeAttempt::failed(format!("request to {url} failed: {e}"));
        }
    };

    let status = resp.status().as_u16();
    let body = match Limited::new(resp.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return ProbeAttempt::failed(format!("reading body from {url} failed: {e}")),
    };

    let attempt = classify_readiness(status, &body);
    if !attempt.is_ready() {
        debug!(%url, status, detail = ?attempt.detail, "readiness check did not pass");
    }
    attempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn serve(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/api/health/ready")
    }

    #[test]
    fn ready_body_passes() {
        let attempt = classify_readiness(200, br#"{"status":"ready","database":true}"#);
        assert_eq!(attempt.result, ProbeResult::Ready);
        assert_eq!(attempt.status, Some(200));
    }

    #[test]
    fn liveness_body_does_not_pass() {
        let attempt = classify_readiness(200, br#"{"status":"live"}"#);
        assert_eq!(attempt.result, ProbeResult::NotReady);
        assert!(attempt.detail.unwrap().contains("live"));
    }

    #[test]
    fn plain_2xx_without_status_passes() {
        assert!(classify_readiness(204, b"").is_ready());
        assert!(classify_readiness(200, b"OK").is_ready());
    }

    #[test]
    fn service_unavailable_carries_errors() {
        let attempt = classify_readiness(
            503,
            br#"{"status":"not ready","errors":["database: connection refused","ml_engine: not ready"]}"#,
        );
        assert_eq!(attempt.result, ProbeResult::NotReady);
        let detail = attempt.detail.unwrap();
        assert!(detail.starts_with("HTTP 503 (not ready)"));
        assert!(detail.contains("database: connection refused"));
    }

    #[tokio::test]
    async fn http_check_ready_endpoint() {
        let url = serve("200 OK", r#"{"status":"ready"}"#).await;
        let attempt = http_check(&url, Duration::from_secs(2)).await;
        assert_eq!(attempt, ProbeAttempt::ready(200));
    }

    #[tokio::test]
    async fn http_check_initializing_endpoint() {
        let url = serve("503 Service Unavailable", r#"{"status":"not ready"}"#).await;
        let attempt = http_check(&url, Duration::from_secs(2)).await;
        assert_eq!(attempt.result, ProbeResult::NotReady);
        assert_eq!(attempt.status, Some(503));
    }

    #[tokio::test]
    async fn http_check_closed_port_fails() {
        let attempt = http_check("http://127.0.0.1:1/ready", Duration::from_millis(200)).await;
        assert_eq!(attempt.result, ProbeResult::Failed);
        assert_eq!(attempt.status, None);
    }

    #[tokio::test]
    async fn http_check_rejects_unsupported_urls() {
        let attempt = http_check("https://example.com/ready", Duration::from_millis(200)).await;
        assert_eq!(attempt.result, ProbeResult::Failed);
        let attempt = http_check("not a url", Duration::from_millis(200)).await;
        assert_eq!(attempt.result, ProbeResult::Failed);
    }
}
