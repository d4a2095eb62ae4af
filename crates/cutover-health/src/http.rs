//! HTTP endpoint probe.
//!
//! Issues a GET against the target's address and verifies the status
//! code and, optionally, that the body contains an expected marker.

use std::time::Duration;

use http_body_util::BodyExt;
use tracing::debug;

use cutover_core::{CheckName, CheckOutcome, Target};

use crate::check::{Check, CheckFuture};

/// HTTP probe: expects a 2xx response, optionally containing a marker
/// string in the body (e.g. a deploy stamp on a `/healthz` page).
pub struct HttpCheck {
    path: String,
    expect_marker: Option<String>,
    timeout: Duration,
}

impl HttpCheck {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            expect_marker: None,
            timeout,
        }
    }

    /// Require the response body to contain `marker`.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.expect_marker = Some(marker.into());
        self
    }
}

impl Check for HttpCheck {
    fn name(&self) -> CheckName {
        CheckName::Http
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, target: &Target) -> CheckFuture {
        let address = target.address.clone();
        let path = self.path.clone();
        let marker = self.expect_marker.clone();
        Box::pin(async move { probe(&address, &path, marker.as_deref()).await })
    }
}

async fn probe(address: &str, path: &str, marker: Option<&str>) -> CheckOutcome {
    let uri = format!("http://{address}{path}");

    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %uri, "http probe connection failed");
            return CheckOutcome::fail(format!("connect: {e}"));
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "http probe handshake failed");
            return CheckOutcome::fail(format!("handshake: {e}"));
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "cutover-health/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .unwrap();

    let resp = match sender.send_request(req).await {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, %uri, "http probe request failed");
            return CheckOutcome::fail(format!("request: {e}"));
        }
    };

    let status = resp.status();
    let body = match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return CheckOutcome::fail(format!("read body: {e}")),
    };

    if !status.is_success() {
        debug!(status = %status, %uri, "http probe non-2xx");
        return CheckOutcome::fail(format!("status {status}"));
    }

    if let Some(marker) = marker {
        if !String::from_utf8_lossy(&body).contains(marker) {
            return CheckOutcome::fail(format!("body missing marker \"{marker}\""));
        }
    }

    CheckOutcome::pass(format!("{status}"))
}
