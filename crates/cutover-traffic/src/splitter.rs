//! Upstream weight configuration and reload signalling.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use cutover_core::{DeployError, DeployResult, ReleaseId};

/// Boxed future returned by splitter operations.
pub type SplitFuture<T> = Pin<Box<dyn Future<Output = DeployResult<T>> + Send>>;

/// Routes a percentage of live traffic to a candidate release.
pub trait TrafficSplitter: Send + Sync {
    /// Set the candidate's traffic weight (0–100). The remainder goes
    /// to the stable release.
    fn set_weight(&self, candidate: &ReleaseId, percent: u8) -> SplitFuture<()>;

    /// The candidate's currently configured weight; 0 if the candidate
    /// is not in the routing config.
    fn current_weight(&self, candidate: &ReleaseId) -> SplitFuture<u8>;
}

/// File-backed splitter: renders an nginx-style upstream block and runs
/// a reload command.
///
/// If the reload is not acknowledged the previous artifact is restored,
/// so the on-disk configuration never disagrees with what the routing
/// layer last accepted.
pub struct UpstreamFileSplitter {
    upstream_name: String,
    stable_addr: String,
    candidate_addr: String,
    artifact_path: PathBuf,
    reload_command: String,
    reload_timeout: Duration,
}

impl UpstreamFileSplitter {
    pub fn new(
        upstream_name: impl Into<String>,
        stable_addr: impl Into<String>,
        candidate_addr: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        reload_command: impl Into<String>,
        reload_timeout: Duration,
    ) -> Self {
        Self {
            upstream_name: upstream_name.into(),
            stable_addr: stable_addr.into(),
            candidate_addr: candidate_addr.into(),
            artifact_path: artifact_path.into(),
            reload_command: reload_command.into(),
            reload_timeout,
        }
    }

    /// Render the upstream block for the given candidate weight.
    ///
    /// nginx rejects `weight=0`, so a side at zero weight is omitted
    /// entirely; the header comment carries the candidate id and weight
    /// for readback.
    fn render(&self, candidate: &ReleaseId, percent: u8) -> String {
        let mut out = String::new();
        out.push_str("# managed by cutover; do not edit\n");
        out.push_str(&format!("# candidate: {candidate} weight={percent}\n"));
        out.push_str(&format!("upstream {} {{\n", self.upstream_name));
        if percent < 100 {
            out.push_str(&format!(
                "    server {} weight={};\n",
                self.stable_addr,
                100 - percent
            ));
        }
        if percent > 0 {
            out.push_str(&format!(
                "    server {} weight={};\n",
                self.candidate_addr, percent
            ));
        }
        out.push_str("}\n");
        out
    }
}

/// Signal the routing layer to pick up the new weights.
async fn run_reload(command: &str, timeout: Duration) -> DeployResult<()> {
    let run = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(DeployError::Infrastructure(format!(
            "routing reload exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Ok(Err(e)) => Err(DeployError::Infrastructure(format!(
            "routing reload spawn failed: {e}"
        ))),
        Err(_) => Err(DeployError::Infrastructure("routing reload timed out".into())),
    }
}

impl TrafficSplitter for UpstreamFileSplitter {
    fn set_weight(&self, candidate: &ReleaseId, percent: u8) -> SplitFuture<()> {
        if percent > 100 {
            let err = DeployError::Config(format!("traffic weight {percent} out of range 0-100"));
            return Box::pin(async move { Err(err) });
        }

        let content = self.render(candidate, percent);
        let path = self.artifact_path.clone();
        let candidate = candidate.clone();
        let reload_command = self.reload_command.clone();
        let reload_timeout = self.reload_timeout;

        Box::pin(async move {
            let prior = match tokio::fs::read_to_string(&path).await {
                Ok(s) => Some(s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(DeployError::Storage(format!("read artifact: {e}"))),
            };

            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, &content)
                .await
                .map_err(|e| DeployError::Storage(format!("write artifact: {e}")))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| DeployError::Storage(format!("install artifact: {e}")))?;

            match run_reload(&reload_command, reload_timeout).await {
                Ok(()) => {
                    info!(%candidate, percent, "traffic weight applied");
                    Ok(())
                }
                Err(e) => {
                    // Roll the artifact back so disk matches the last
                    // acknowledged configuration.
                    let restore = match prior {
                        Some(content) => tokio::fs::write(&path, content).await,
                        None => tokio::fs::remove_file(&path).await,
                    };
                    if let Err(re) = restore {
                        warn!(error = %re, "failed to restore traffic artifact after reload failure");
                    } else {
                        debug!("traffic artifact restored after reload failure");
                    }
                    Err(e)
                }
            }
        })
    }

    fn current_weight(&self, candidate: &ReleaseId) -> SplitFuture<u8> {
        let path = self.artifact_path.clone();
        let candidate = candidate.clone();

        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(DeployError::Storage(format!("read artifact: {e}"))),
            };
            Ok(parse_weight(&content, &candidate).unwrap_or(0))
        })
    }
}

/// Extract the candidate weight from the artifact header comment.
fn parse_weight(content: &str, candidate: &str) -> Option<u8> {
    let line = content
        .lines()
        .find(|l| l.starts_with("# candidate: "))?;
    let rest = line.strip_prefix("# candidate: ")?;
    let (id, weight) = rest.split_once(" weight=")?;
    if id != candidate {
        return None;
    }
    weight.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn splitter(dir: &TempDir, reload_command: &str) -> UpstreamFileSplitter {
        UpstreamFileSplitter::new(
            "app_backend",
            "127.0.0.1:9001",
            "127.0.0.1:9002",
            dir.path().join("upstream.conf"),
            reload_command,
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn set_weight_renders_both_sides() {
        let dir = TempDir::new().unwrap();
        let s = splitter(&dir, "true");

        s.set_weight(&"r1".to_string(), 10).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap();

        assert!(content.contains("upstream app_backend {"));
        assert!(content.contains("server 127.0.0.1:9001 weight=90;"));
        assert!(content.contains("server 127.0.0.1:9002 weight=10;"));
    }

    #[tokio::test]
    async fn zero_weight_omits_candidate() {
        let dir = TempDir::new().unwrap();
        let s = splitter(&dir, "true");

        s.set_weight(&"r1".to_string(), 0).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap();
        assert!(content.contains("server 127.0.0.1:9001 weight=100;"));
        assert!(!content.contains("127.0.0.1:9002"));
    }

    #[tokio::test]
    async fn full_weight_omits_stable() {
        let dir = TempDir::new().unwrap();
        let s = splitter(&dir, "true");

        s.set_weight(&"r1".to_string(), 100).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("upstream.conf")).unwrap();
        assert!(content.contains("server 127.0.0.1:9002 weight=100;"));
        assert!(!content.contains("127.0.0.1:9001"));
    }

    #[tokio::test]
    async fn weight_reads_back() {
        let dir = TempDir::new().unwrap();
        let s = splitter(&dir, "true");
        let candidate = "20260805120000".to_string();

        assert_eq!(s.current_weight(&candidate).await.unwrap(), 0);

        s.set_weight(&candidate, 37).await.unwrap();
        assert_eq!(s.current_weight(&candidate).await.unwrap(), 37);

        // A different candidate reads as 0.
        assert_eq!(s.current_weight(&"other".to_string()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn out_of_range_weight_rejected() {
        let dir = TempDir::new().unwrap();
        let s = splitter(&dir, "true");
        let err = s.set_weight(&"r1".to_string(), 101).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[tokio::test]
    async fn reload_failure_restores_prior_artifact() {
        let dir = TempDir::new().unwrap();
        let candidate = "r1".to_string();

        let good = splitter(&dir, "true");
        good.set_weight(&candidate, 10).await.unwrap();

        let bad = splitter(&dir, "false");
        let err = bad.set_weight(&candidate, 50).await.unwrap_err();
        assert!(matches!(err, DeployError::Infrastructure(_)));

        // Disk still shows the last acknowledged weight.
        assert_eq!(good.current_weight(&candidate).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn reload_failure_on_first_write_removes_artifact() {
        let dir = TempDir::new().unwrap();
        let bad = splitter(&dir, "exit 1");

        let err = bad.set_weight(&"r1".to_string(), 10).await.unwrap_err();
        assert!(matches!(err, DeployError::Infrastructure(_)));
        assert!(!dir.path().join("upstream.conf").exists());
    }

    #[tokio::test]
    async fn reload_timeout_is_infrastructure_error() {
        let dir = TempDir::new().unwrap();
        let slow = UpstreamFileSplitter::new(
            "app_backend",
            "127.0.0.1:9001",
            "127.0.0.1:9002",
            dir.path().join("upstream.conf"),
            "sleep 5",
            Duration::from_millis(50),
        );

        let err = slow.set_weight(&"r1".to_string(), 10).await.unwrap_err();
        assert!(matches!(err, DeployError::Infrastructure(_)));
        assert!(err.to_string().contains("timed out"));
    }
}
