//! Single-flight deploy lock.
//!
//! At most one deployment or canary may drive a given environment at a
//! time. The lock is an advisory file created with `O_EXCL` in the
//! environment directory; a second acquisition fails fast with
//! `AlreadyInProgress` instead of queuing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cutover_core::{DeployError, DeployResult};

const LOCK_FILE: &str = "deploy.lock";

/// Contents of the lock file, for operator diagnostics.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held advisory lock for one environment. Released on drop.
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    /// Acquire the deploy lock for an environment directory.
    ///
    /// Fails with `AlreadyInProgress` if another process holds it. A
    /// stale lock (crashed holder) is reported to the operator rather
    /// than silently stolen; `cutover` never breaks a lock on its own.
    pub fn acquire(env_dir: &Path) -> DeployResult<Self> {
        fs::create_dir_all(env_dir)?;
        let path = env_dir.join(LOCK_FILE);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                let bytes = serde_json::to_vec(&info)
                    .map_err(|e| DeployError::Storage(format!("serialize lock info: {e}")))?;
                file.write_all(&bytes)?;
                file.sync_all()?;
                debug!(path = %path.display(), pid = info.pid, "deploy lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = match fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<LockInfo>(&s).ok())
                {
                    Some(info) => format!("held by pid {} since {}", info.pid, info.acquired_at),
                    None => "lock file unreadable; remove it manually if stale".to_string(),
                };
                warn!(path = %path.display(), %holder, "deploy lock contended");
                Err(DeployError::AlreadyInProgress(holder))
            }
            Err(e) => Err(DeployError::Storage(format!(
                "acquire lock {}: {e}",
                path.display()
            ))),
        }
    }

    /// Path of the lock file (for diagnostics).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release deploy lock");
        }
    }
}
