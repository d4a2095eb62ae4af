//! The pluggable `Check` trait and the command-driven built-in checks.
//!
//! Most infrastructure checks (service liveness, database integrity,
//! queue depth, disk usage, TLS expiry) shell out to a configured
//! command, which keeps the evaluator independent of any particular
//! service manager, database client, or broker. A command exits zero to
//! signal success; checks with a numeric reading print it on stdout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use cutover_core::{CheckName, CheckOutcome, Target};

/// Boxed future returned by a check run.
pub type CheckFuture = Pin<Box<dyn Future<Output = CheckOutcome> + Send>>;

/// A single health check, polymorphic over its probe mechanism.
///
/// Implementations must be cheap to invoke; the evaluator enforces the
/// per-check `timeout` externally, so `run` may block for as long as it
/// likes and still cannot stall the aggregate verdict.
pub trait Check: Send + Sync {
    fn name(&self) -> CheckName;

    /// Per-check timeout enforced by the evaluator.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn run(&self, target: &Target) -> CheckFuture;
}

// ── Command check ──────────────────────────────────────────────────

/// Runs a configured shell command against the target.
///
/// `{env}` and `{address}` placeholders in the command are substituted
/// with the target's fields. With a `ceiling`, the command's stdout is
/// parsed as a number and the check fails when the reading exceeds it
/// (queue depth, disk percent); without one, a zero exit is a pass.
pub struct CommandCheck {
    name: CheckName,
    command: String,
    ceiling: Option<f64>,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(name: CheckName, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name,
            command: command.into(),
            ceiling: None,
            timeout,
        }
    }

    /// Fail the check when the numeric stdout reading exceeds `ceiling`.
    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

impl Check for CommandCheck {
    fn name(&self) -> CheckName {
        self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, target: &Target) -> CheckFuture {
        let name = self.name;
        let command = substitute(&self.command, target);
        let ceiling = self.ceiling;

        Box::pin(async move {
            let output = run_command(&command).await;
            let output = match output {
                Ok(o) => o,
                Err(e) => return CheckOutcome::fail(format!("spawn failed: {e}")),
            };

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            if !output.status.success() {
                let detail = last_line(&stderr).or_else(|| last_line(&stdout));
                return CheckOutcome::fail(format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    detail.unwrap_or_default()
                ));
            }

            match ceiling {
                Some(limit) => match parse_reading(&stdout) {
                    Some(reading) if reading <= limit => {
                        debug!(check = %name, reading, limit, "reading under ceiling");
                        CheckOutcome::pass(format!("{reading} <= {limit}")).with_metric(reading)
                    }
                    Some(reading) => {
                        CheckOutcome::fail(format!("{reading} exceeds ceiling {limit}"))
                            .with_metric(reading)
                    }
                    None => CheckOutcome::fail("no numeric reading on stdout"),
                },
                None => {
                    let detail = last_line(&stdout).unwrap_or_else(|| "ok".to_string());
                    CheckOutcome::pass(detail)
                }
            }
        })
    }
}

// ── TLS expiry check ───────────────────────────────────────────────

/// Checks the certificate expiry horizon.
///
/// The configured command prints the number of days until the
/// certificate expires (e.g. a wrapper around `openssl x509 -enddate`).
/// Below `fail_days` the check fails; below `warn_days` it passes with
/// a warning diagnostic.
pub struct TlsExpiryCheck {
    command: String,
    warn_days: f64,
    fail_days: f64,
    timeout: Duration,
}

impl TlsExpiryCheck {
    pub fn new(
        command: impl Into<String>,
        warn_days: f64,
        fail_days: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            warn_days,
            fail_days,
            timeout,
        }
    }
}

impl Check for TlsExpiryCheck {
    fn name(&self) -> CheckName {
        CheckName::TlsExpiry
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, target: &Target) -> CheckFuture {
        let command = substitute(&self.command, target);
        let warn_days = self.warn_days;
        let fail_days = self.fail_days;

        Box::pin(async move {
            let output = match run_command(&command).await {
                Ok(o) => o,
                Err(e) => return CheckOutcome::fail(format!("spawn failed: {e}")),
            };
            if !output.status.success() {
                return CheckOutcome::fail("expiry command failed");
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let days = match parse_reading(&stdout) {
                Some(d) => d,
                None => return CheckOutcome::fail("no expiry reading on stdout"),
            };

            if days < fail_days {
                CheckOutcome::fail(format!("certificate expires in {days} days")).with_metric(days)
            } else if days < warn_days {
                CheckOutcome::pass(format!("warning: certificate expires in {days} days"))
                    .with_metric(days)
            } else {
                CheckOutcome::pass(format!("expires in {days} days")).with_metric(days)
            }
        })
    }
}

// ── Cache ping check ───────────────────────────────────────────────

/// Round-trips an inline `PING` against a Redis-protocol cache.
pub struct RedisPingCheck {
    addr: String,
    timeout: Duration,
}

impl RedisPingCheck {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Check for RedisPingCheck {
    fn name(&self) -> CheckName {
        CheckName::Cache
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&self, _target: &Target) -> CheckFuture {
        let addr = self.addr.clone();

        Box::pin(async move {
            let mut stream = match tokio::net::TcpStream::connect(&addr).await {
                Ok(s) => s,
                Err(e) => return CheckOutcome::fail(format!("connect {addr}: {e}")),
            };
            if let Err(e) = stream.write_all(b"PING\r\n").await {
                return CheckOutcome::fail(format!("write: {e}"));
            }

            let mut buf = [0u8; 64];
            match stream.read(&mut buf).await {
                Ok(n) if buf[..n].starts_with(b"+PONG") => CheckOutcome::pass("PONG"),
                Ok(n) => CheckOutcome::fail(format!(
                    "unexpected reply: {}",
                    String::from_utf8_lossy(&buf[..n]).trim()
                )),
                Err(e) => CheckOutcome::fail(format!("read: {e}")),
            }
        })
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn substitute(command: &str, target: &Target) -> String {
    command
        .replace("{env}", &target.environment)
        .replace("{address}", &target.address)
}

async fn run_command(command: &str) -> std::io::Result<std::process::Output> {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await
}

fn last_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .next_back()
        .map(str::to_string)
}

/// Parse the last non-empty stdout line as a numeric reading.
fn parse_reading(stdout: &str) -> Option<f64> {
    last_line(stdout)?.trim_end_matches('%').trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new("prod", "127.0.0.1:8080")
    }

    #[tokio::test]
    async fn command_check_passes_on_zero_exit() {
        let check = CommandCheck::new(
            CheckName::Service,
            "echo service running",
            Duration::from_secs(5),
        );
        let outcome = check.run(&target()).await;
        assert!(outcome.pass);
        assert_eq!(outcome.diagnostic, "service running");
    }

    #[tokio::test]
    async fn command_check_fails_on_nonzero_exit() {
        let check = CommandCheck::new(
            CheckName::Database,
            "echo connection refused >&2; exit 3",
            Duration::from_secs(5),
        );
        let outcome = check.run(&target()).await;
        assert!(!outcome.pass);
        assert!(outcome.diagnostic.contains("exit 3"));
        assert!(outcome.diagnostic.contains("connection refused"));
    }

    #[tokio::test]
    async fn command_check_substitutes_target_placeholders() {
        let check = CommandCheck::new(CheckName::Service, "echo {env} {address}", Duration::from_secs(5));
        let outcome = check.run(&target()).await;
        assert_eq!(outcome.diagnostic, "prod 127.0.0.1:8080");
    }

    #[tokio::test]
    async fn ceiling_check_passes_under_limit() {
        let check = CommandCheck::new(CheckName::Queue, "echo 7", Duration::from_secs(5))
            .with_ceiling(10.0);
        let outcome = check.run(&target()).await;
        assert!(outcome.pass);
        assert_eq!(outcome.metric, Some(7.0));
    }

    #[tokio::test]
    async fn ceiling_check_fails_over_limit() {
        let check = CommandCheck::new(CheckName::Queue, "echo 42", Duration::from_secs(5))
            .with_ceiling(10.0);
        let outcome = check.run(&target()).await;
        assert!(!outcome.pass);
        assert_eq!(outcome.metric, Some(42.0));
    }

    #[tokio::test]
    async fn ceiling_check_strips_percent_sign() {
        let check = CommandCheck::new(CheckName::Disk, "echo 81%", Duration::from_secs(5))
            .with_ceiling(90.0);
        let outcome = check.run(&target()).await;
        assert!(outcome.pass);
        assert_eq!(outcome.metric, Some(81.0));
    }

    #[tokio::test]
    async fn ceiling_check_fails_without_reading() {
        let check = CommandCheck::new(CheckName::Queue, "true", Duration::from_secs(5))
            .with_ceiling(10.0);
        let outcome = check.run(&target()).await;
        assert!(!outcome.pass);
        assert!(outcome.diagnostic.contains("no numeric reading"));
    }

    #[tokio::test]
    async fn tls_check_ok_warn_fail_bands() {
        let ok = TlsExpiryCheck::new("echo 60", 30.0, 14.0, Duration::from_secs(5));
        let outcome = ok.run(&target()).await;
        assert!(outcome.pass);
        assert!(!outcome.diagnostic.contains("warning"));

        let warn = TlsExpiryCheck::new("echo 20", 30.0, 14.0, Duration::from_secs(5));
        let outcome = warn.run(&target()).await;
        assert!(outcome.pass);
        assert!(outcome.diagnostic.contains("warning"));

        let fail = TlsExpiryCheck::new("echo 5", 30.0, 14.0, Duration::from_secs(5));
        let outcome = fail.run(&target()).await;
        assert!(!outcome.pass);
        assert_eq!(outcome.metric, Some(5.0));
    }

    #[tokio::test]
    async fn redis_ping_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
            socket.write_all(b"+PONG\r\n").await.unwrap();
        });

        let check = RedisPingCheck::new(addr, Duration::from_secs(2));
        let outcome = check.run(&target()).await;
        assert!(outcome.pass, "diagnostic: {}", outcome.diagnostic);
    }

    #[tokio::test]
    async fn redis_ping_rejects_wrong_reply() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
            socket.write_all(b"-ERR loading\r\n").await.unwrap();
        });

        let check = RedisPingCheck::new(addr, Duration::from_secs(2));
        let outcome = check.run(&target()).await;
        assert!(!outcome.pass);
        assert!(outcome.diagnostic.contains("unexpected reply"));
    }

    #[tokio::test]
    async fn redis_ping_connection_refused() {
        let check = RedisPingCheck::new("127.0.0.1:1", Duration::from_secs(1));
        let outcome = check.run(&target()).await;
        assert!(!outcome.pass);
    }
}
