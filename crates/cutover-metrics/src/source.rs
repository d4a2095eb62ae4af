//! Metrics source abstraction and the HTTP range-summary client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http_body_util::BodyExt;
use tracing::debug;

use cutover_core::{DeployError, DeployResult, MetricsSnapshot};

/// Boxed future returned by a metrics query.
pub type QueryFuture = Pin<Box<dyn Future<Output = DeployResult<MetricsSnapshot>> + Send>>;

/// A time-series source that can summarize a trailing window.
pub trait MetricsSource: Send + Sync {
    /// Query error rate and latency percentiles for the series matched
    /// by `selector` over the trailing `window`.
    fn query(&self, selector: &str, window: Duration) -> QueryFuture;
}

/// HTTP client for a Prometheus-style summary endpoint.
///
/// Issues `GET /api/v1/summary?selector=...&window=...s` against the
/// configured address and expects a `MetricsSnapshot` JSON body. Any
/// transport error, non-2xx status, or unparsable body surfaces as an
/// `Infrastructure` error, which the gate treats as fail-closed.
pub struct HttpMetricsSource {
    address: String,
    timeout: Duration,
}

impl HttpMetricsSource {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

impl MetricsSource for HttpMetricsSource {
    fn query(&self, selector: &str, window: Duration) -> QueryFuture {
        let address = self.address.clone();
        let selector = selector.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            let fetch = fetch_summary(&address, &selector, window);
            match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(DeployError::Infrastructure(
                    "metrics query timed out".into(),
                )),
            }
        })
    }
}

async fn fetch_summary(
    address: &str,
    selector: &str,
    window: Duration,
) -> DeployResult<MetricsSnapshot> {
    let uri = format!(
        "http://{address}/api/v1/summary?selector={}&window={}s",
        urlencode(selector),
        window.as_secs()
    );

    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| DeployError::Infrastructure(format!("metrics connect: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| DeployError::Infrastructure(format!("metrics handshake: {e}")))?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "cutover-metrics/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .unwrap();

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| DeployError::Infrastructure(format!("metrics request: {e}")))?;

    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| DeployError::Infrastructure(format!("metrics body: {e}")))?
        .to_bytes();

    if !status.is_success() {
        return Err(DeployError::Infrastructure(format!(
            "metrics query returned {status}"
        )));
    }

    let snapshot: MetricsSnapshot = serde_json::from_slice(&body)
        .map_err(|e| DeployError::Infrastructure(format!("metrics parse: {e}")))?;

    debug!(
        error_rate = snapshot.error_rate,
        p95_ms = snapshot.p95_ms,
        "metrics snapshot fetched"
    );
    Ok(snapshot)
}

/// Percent-encode a query value (RFC 3986 unreserved set passes through).
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
