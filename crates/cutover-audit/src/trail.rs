//! The JSONL audit trail writer and readers.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cutover_core::{DeployError, DeployResult, EnvName, ReleaseId};

const TRAIL_FILE: &str = "audit.log";

/// One audit entry: a state transition and the decision behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Who decided: "engine" for automated transitions, "operator:<name>"
    /// for manual actions.
    pub actor: String,
    pub environment: EnvName,
    pub from_state: String,
    pub to_state: String,
    pub reason: String,
    pub release: Option<ReleaseId>,
}

/// Append-only writer for one environment's audit log.
///
/// Writes are synchronous and fsynced per record. Sequence numbers
/// continue from the last persisted record across process restarts.
pub struct AuditTrail {
    env: EnvName,
    path: PathBuf,
    file: File,
    next_seq: u64,
}

impl AuditTrail {
    /// Open (or create) the trail in the environment directory.
    pub fn open(env: impl Into<EnvName>, env_dir: &Path) -> DeployResult<Self> {
        fs::create_dir_all(env_dir)?;
        let path = env_dir.join(TRAIL_FILE);

        let next_seq = match read_records(&path)?.last() {
            Some(last) => last.seq + 1,
            None => 1,
        };

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| DeployError::Storage(format!("open {}: {e}", path.display())))?;

        debug!(path = %path.display(), next_seq, "audit trail opened");
        Ok(Self {
            env: env.into(),
            path,
            file,
            next_seq,
        })
    }

    /// Append a record and fsync before returning.
    pub fn append(
        &mut self,
        actor: &str,
        from_state: &str,
        to_state: &str,
        reason: &str,
        release: Option<&ReleaseId>,
    ) -> DeployResult<AuditRecord> {
        let record = AuditRecord {
            seq: self.next_seq,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            environment: self.env.clone(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            reason: reason.to_string(),
            release: release.cloned(),
        };

        let mut line = serde_json::to_vec(&record)
            .map_err(|e| DeployError::Storage(format!("serialize audit record: {e}")))?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_all()?;

        self.next_seq += 1;
        debug!(
            seq = record.seq,
            from = %record.from_state,
            to = %record.to_state,
            "audit record written"
        );
        Ok(record)
    }

    /// Sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// All records, oldest first.
    pub fn read_all(&self) -> DeployResult<Vec<AuditRecord>> {
        read_records(&self.path)
    }

    /// The last `n` records, oldest first.
    pub fn tail(&self, n: usize) -> DeployResult<Vec<AuditRecord>> {
        let mut records = self.read_all()?;
        let start = records.len().saturating_sub(n);
        Ok(records.split_off(start))
    }

    /// Records with `seq >= from`, i.e. everything belonging to an
    /// attempt that started at sequence `from`.
    pub fn records_from(&self, from: u64) -> DeployResult<Vec<AuditRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.seq >= from)
            .collect())
    }
}

/// Parse all records from a trail file. Unparsable lines are skipped
/// with a warning so one torn write cannot make history unreadable.
fn read_records(path: &Path) -> DeployResult<Vec<AuditRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(DeployError::Storage(format!(
                "open {}: {e}",
                path.display()
            )));
        }
    };

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unparsable audit line"
                );
            }
        }
    }
    Ok(records)
}
