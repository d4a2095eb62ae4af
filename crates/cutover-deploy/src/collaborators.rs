//! External collaborators of the engine: backup and migration.
//!
//! Both are opaque to the engine — invoked once per deployment with a
//! timeout, success or failure is all the state machine consumes. The
//! command-backed implementations cover the production setup; tests
//! swap in scripted fakes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tracing::info;

use cutover_core::{DeployError, DeployResult};

/// Boxed future returned by collaborator calls.
pub type StepFuture<T> = Pin<Box<dyn Future<Output = DeployResult<T>> + Send>>;

/// Creates the pre-deploy backup. Returns an opaque backup id.
pub trait BackupProvider: Send + Sync {
    fn create_backup(&self, env: &str) -> StepFuture<String>;
}

/// Runs the release's migration step against its directory.
pub trait Migrator: Send + Sync {
    fn migrate(&self, release_dir: &Path) -> StepFuture<()>;
}

/// Backup provider that shells out to a configured command.
///
/// `{env}` in the command is substituted with the environment name; the
/// last stdout line is taken as the backup id.
pub struct CommandBackup {
    command: String,
    timeout: Duration,
}

impl CommandBackup {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl BackupProvider for CommandBackup {
    fn create_backup(&self, env: &str) -> StepFuture<String> {
        let command = self.command.replace("{env}", env);
        let timeout = self.timeout;

        Box::pin(async move {
            let output = run_step("backup", &command, None, timeout).await?;
            let id = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .next_back()
                .unwrap_or("unnamed")
                .to_string();
            info!(backup = %id, "pre-deploy backup created");
            Ok(id)
        })
    }
}

/// Migrator that runs a configured command inside the release directory.
pub struct CommandMigrator {
    command: String,
    timeout: Duration,
}

impl CommandMigrator {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl Migrator for CommandMigrator {
    fn migrate(&self, release_dir: &Path) -> StepFuture<()> {
        let command = self.command.clone();
        let timeout = self.timeout;
        let cwd = release_dir.to_path_buf();

        Box::pin(async move {
            run_step("migration", &command, Some(&cwd), timeout).await?;
            info!(release_dir = %cwd.display(), "migration step completed");
            Ok(())
        })
    }
}

/// Run a collaborator command under a timeout. A non-zero exit or a
/// timeout is an `Infrastructure` error.
async fn run_step(
    what: &str,
    command: &str,
    cwd: Option<&PathBuf>,
    timeout: Duration,
) -> DeployResult<std::process::Output> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(output),
        Ok(Ok(output)) => Err(DeployError::Infrastructure(format!(
            "{what} command exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Ok(Err(e)) => Err(DeployError::Infrastructure(format!(
            "{what} command spawn failed: {e}"
        ))),
        Err(_) => Err(DeployError::Infrastructure(format!("{what} timed out"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backup_returns_last_stdout_line() {
        let backup = CommandBackup::new(
            "echo starting; echo backup-{env}-42",
            Duration::from_secs(5),
        );
        let id = backup.create_backup("prod").await.unwrap();
        assert_eq!(id, "backup-prod-42");
    }

    #[tokio::test]
    async fn backup_failure_is_infrastructure() {
        let backup = CommandBackup::new("echo no space >&2; exit 1", Duration::from_secs(5));
        let err = backup.create_backup("prod").await.unwrap_err();
        assert!(matches!(err, DeployError::Infrastructure(_)));
        assert!(err.to_string().contains("no space"));
    }

    #[tokio::test]
    async fn backup_timeout_is_infrastructure() {
        let backup = CommandBackup::new("sleep 10", Duration::from_millis(50));
        let err = backup.create_backup("prod").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn migrator_runs_in_release_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let migrator = CommandMigrator::new("touch migrated", Duration::from_secs(5));
        migrator.migrate(dir.path()).await.unwrap();
        assert!(dir.path().join("migrated").exists());
    }

    #[tokio::test]
    async fn migrator_failure_is_infrastructure() {
        let dir = tempfile::TempDir::new().unwrap();
        let migrator = CommandMigrator::new("exit 7", Duration::from_secs(5));
        let err = migrator.migrate(dir.path()).await.unwrap_err();
        assert!(matches!(err, DeployError::Infrastructure(_)));
        assert!(err.to_string().contains("exited 7"));
    }
}
