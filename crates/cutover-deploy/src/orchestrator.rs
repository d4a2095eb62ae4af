//! The blue-green deployment orchestrator.
//!
//! Walks the `machine` state machine, performing each state's side
//! effect and feeding the result back as the next event. The audit
//! record for a transition is written *before* the new state's action
//! runs, so a crash mid-action leaves a record of intended vs
//! completed state.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use cutover_audit::AuditTrail;
use cutover_core::{
    CheckName, DeployError, DeployResult, Release, ReleaseStatus, Target,
};
use cutover_health::HealthEvaluator;
use cutover_release::{DeployLock, ReleaseStore};

use crate::collaborators::{BackupProvider, Migrator};
use crate::machine::{DeployEvent, DeployState, FailureKind, transition};
use crate::notify::{Notice, Notifier};

/// Terminal result of a blue-green attempt.
#[derive(Debug)]
pub struct DeployOutcome {
    pub state: DeployState,
    pub release: Option<Release>,
    pub failure: Option<FailureKind>,
    /// First audit sequence number of this attempt; everything from
    /// here on in the trail belongs to it.
    pub attempt_start_seq: u64,
}

impl DeployOutcome {
    /// CLI exit code: 0 success, 1 gate failure (safe, rolled back),
    /// 2 infrastructure error (operator attention).
    pub fn exit_code(&self) -> i32 {
        match self.state {
            DeployState::Done => 0,
            DeployState::RolledBack if self.failure == Some(FailureKind::Gate) => 1,
            _ => 2,
        }
    }
}

/// Drives a blue-green deployment for one environment.
pub struct DeploymentOrchestrator {
    store: ReleaseStore,
    evaluator: HealthEvaluator,
    trail: AuditTrail,
    backup: Arc<dyn BackupProvider>,
    migrator: Arc<dyn Migrator>,
    notifier: Arc<dyn Notifier>,
    required_checks: Vec<CheckName>,
    /// Where the candidate listens while evaluated in isolation.
    candidate_target: Target,
    /// Where live traffic lands after the switch.
    live_target: Target,
    retain: usize,
}

impl DeploymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ReleaseStore,
        evaluator: HealthEvaluator,
        trail: AuditTrail,
        backup: Arc<dyn BackupProvider>,
        migrator: Arc<dyn Migrator>,
        notifier: Arc<dyn Notifier>,
        required_checks: Vec<CheckName>,
        candidate_target: Target,
        live_target: Target,
        retain: usize,
    ) -> Self {
        Self {
            store,
            evaluator,
            trail,
            backup,
            migrator,
            notifier,
            required_checks,
            candidate_target,
            live_target,
            retain,
        }
    }

    /// Run a full blue-green deployment of the given artifact.
    ///
    /// Holds the environment's deploy lock for the whole attempt; a
    /// concurrent invocation fails fast with `AlreadyInProgress`.
    pub async fn run(&mut self, artifact: &Path, actor: &str) -> DeployResult<DeployOutcome> {
        let _lock = DeployLock::acquire(self.store.root())?;
        let attempt_start_seq = self.trail.next_seq();
        info!(
            env = %self.store.env(),
            artifact = %artifact.display(),
            "blue-green deployment starting"
        );

        let mut state = DeployState::Idle;
        let mut event = DeployEvent::Start;
        let mut reason = format!("blue-green deployment of {} requested", artifact.display());
        let mut release: Option<Release> = None;
        let mut switched = false;
        let mut failure: Option<FailureKind> = None;

        loop {
            let next = transition(state, event);
            self.trail.append(
                actor,
                &state.to_string(),
                &next.to_string(),
                &reason,
                release.as_ref().map(|r| &r.id),
            )?;
            state = next;
            if state.is_terminal() {
                break;
            }

            match self.perform(state, artifact, &mut release, &mut switched).await {
                Ok(detail) => {
                    event = DeployEvent::Succeeded;
                    reason = detail;
                }
                Err(e) => {
                    let kind = if e.is_gate_failure() {
                        FailureKind::Gate
                    } else {
                        FailureKind::Infra
                    };
                    failure.get_or_insert(kind);
                    warn!(state = %state, error = %e, "deployment step failed");
                    event = DeployEvent::Failed(kind);
                    reason = e.to_string();
                }
            }
        }

        self.announce(state, &release, switched, &reason);
        info!(env = %self.store.env(), state = %state, "blue-green deployment finished");

        Ok(DeployOutcome {
            state,
            release,
            failure,
            attempt_start_seq,
        })
    }

    /// Perform the side effect of a (non-terminal) state. The returned
    /// detail becomes the reason on the next audit record.
    async fn perform(
        &mut self,
        state: DeployState,
        artifact: &Path,
        release: &mut Option<Release>,
        switched: &mut bool,
    ) -> DeployResult<String> {
        match state {
            DeployState::Backup => {
                let id = self.backup.create_backup(self.store.env()).await?;
                Ok(format!("backup {id} created"))
            }

            DeployState::Provision => {
                let created = self.store.create(artifact)?;
                let id = created.id.clone();
                *release = Some(created);
                Ok(format!("release {id} provisioned"))
            }

            DeployState::Migrate => {
                let current = release
                    .as_ref()
                    .ok_or_else(|| DeployError::Infrastructure("no candidate release".into()))?;
                self.migrator.migrate(&current.path).await?;
                Ok("migration step completed".to_string())
            }

            DeployState::HealthCheck => {
                let report = self
                    .evaluator
                    .evaluate(&self.candidate_target, &self.required_checks)
                    .await;
                if report.overall {
                    Ok("all required checks passed on candidate".to_string())
                } else {
                    Err(DeployError::HealthGate(
                        report.failure_summary(&self.required_checks),
                    ))
                }
            }

            DeployState::Switch => {
                let id = release
                    .as_ref()
                    .map(|r| r.id.clone())
                    .ok_or_else(|| DeployError::Infrastructure("no candidate release".into()))?;
                self.store.switch(&id)?;
                *switched = true;
                Ok(format!("traffic switched to {id}"))
            }

            DeployState::PostVerify => {
                let report = self
                    .evaluator
                    .evaluate(&self.live_target, &self.required_checks)
                    .await;
                if report.overall {
                    Ok("live environment verified".to_string())
                } else {
                    Err(DeployError::HealthGate(
                        report.failure_summary(&self.required_checks),
                    ))
                }
            }

            DeployState::Cleanup => match self.store.prune(self.retain) {
                Ok(deleted) => Ok(format!("pruned {} release(s)", deleted.len())),
                Err(e) => {
                    warn!(error = %e, "release pruning failed");
                    Ok(format!("prune failed: {e} (non-fatal)"))
                }
            },

            DeployState::RollingBack => self.roll_back(release, *switched).await,

            // Terminal states and Idle never reach perform.
            _ => unreachable!("no action for state {state}"),
        }
    }

    /// Revert the attempt: mark the candidate failed and, if traffic
    /// already moved, rebind the pointer and re-verify the reverted
    /// environment.
    async fn roll_back(
        &mut self,
        release: &Option<Release>,
        switched: bool,
    ) -> DeployResult<String> {
        if let Some(candidate) = release {
            self.store.set_status(&candidate.id, ReleaseStatus::Failed)?;
        }

        if !switched {
            return Ok(match release {
                Some(candidate) => {
                    format!("candidate {} discarded before traffic exposure", candidate.id)
                }
                None => "no candidate materialized".to_string(),
            });
        }

        let restored = self.store.rollback_to_previous()?;
        let report = self
            .evaluator
            .evaluate(&self.live_target, &self.required_checks)
            .await;
        if !report.overall {
            return Err(DeployError::Infrastructure(format!(
                "reverted to {} but re-verification failed: {}",
                restored.id,
                report.failure_summary(&self.required_checks)
            )));
        }
        Ok(format!("reverted to {} and re-verified health", restored.id))
    }

    fn announce(
        &self,
        state: DeployState,
        release: &Option<Release>,
        switched: bool,
        reason: &str,
    ) {
        let notice = match state {
            DeployState::Done => release.as_ref().map(|r| Notice::DeployCompleted {
                release: r.id.clone(),
            }),
            DeployState::RolledBack => Some(Notice::DeployRolledBack {
                release: release.as_ref().map(|r| r.id.clone()),
                reason: reason.to_string(),
            }),
            DeployState::Halted => Some(if switched {
                Notice::ManualInterventionRequired {
                    reason: reason.to_string(),
                }
            } else {
                Notice::DeployHalted {
                    reason: reason.to_string(),
                }
            }),
            _ => None,
        };
        if let Some(notice) = notice {
            self.notifier.notify(&notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StepFuture;
    use crate::notify::test_support::RecordingNotifier;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    use cutover_core::CheckOutcome;
    use cutover_health::{Check, CheckFuture};

    /// Check whose pass/fail sequence is scripted per call.
    struct ScriptedCheck {
        name: CheckName,
        script: Mutex<VecDeque<bool>>,
        default: bool,
    }

    impl ScriptedCheck {
        fn new(name: CheckName, script: &[bool], default: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.iter().copied().collect()),
                default,
            })
        }
    }

    impl Check for ScriptedCheck {
        fn name(&self) -> CheckName {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn run(&self, _target: &Target) -> CheckFuture {
            let pass = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.default);
            Box::pin(async move {
                if pass {
                    CheckOutcome::pass("ok")
                } else {
                    CheckOutcome::fail("scripted failure")
                }
            })
        }
    }

    struct FakeBackup {
        fail: bool,
    }

    impl BackupProvider for FakeBackup {
        fn create_backup(&self, _env: &str) -> StepFuture<String> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(DeployError::Infrastructure("backup storage offline".into()))
                } else {
                    Ok("b-1".to_string())
                }
            })
        }
    }

    struct FakeMigrator {
        fail: bool,
    }

    impl Migrator for FakeMigrator {
        fn migrate(&self, _release_dir: &Path) -> StepFuture<()> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(DeployError::Infrastructure("migration exited 1".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct Harness {
        orchestrator: DeploymentOrchestrator,
        notifier: Arc<RecordingNotifier>,
        store: ReleaseStore,
        _env_dir: TempDir,
        artifact: TempDir,
    }

    /// Build an orchestrator over a temp environment with one already
    /// live release, scripted health results, and fakeable
    /// collaborators.
    fn harness(check_script: &[bool], backup_fails: bool, migration_fails: bool) -> Harness {
        let env_dir = TempDir::new().unwrap();
        let store = ReleaseStore::open("prod", env_dir.path().join("prod")).unwrap();

        let artifact = TempDir::new().unwrap();
        std::fs::write(artifact.path().join("app.bin"), "payload").unwrap();

        let check = ScriptedCheck::new(CheckName::Http, check_script, true);
        let evaluator = HealthEvaluator::new(vec![check]);
        let trail = AuditTrail::open("prod", &env_dir.path().join("prod")).unwrap();
        let notifier = Arc::new(RecordingNotifier::new());

        let orchestrator = DeploymentOrchestrator::new(
            store.clone(),
            evaluator,
            trail,
            Arc::new(FakeBackup { fail: backup_fails }),
            Arc::new(FakeMigrator {
                fail: migration_fails,
            }),
            notifier.clone(),
            vec![CheckName::Http],
            Target::new("prod", "127.0.0.1:9002"),
            Target::new("prod", "127.0.0.1:9001"),
            3,
        );

        Harness {
            orchestrator,
            notifier,
            store,
            _env_dir: env_dir,
            artifact,
        }
    }

    /// Seed the store with a live baseline release.
    fn seed_live(h: &Harness) -> Release {
        let seed = h.store.create(h.artifact.path()).unwrap();
        h.store.switch(&seed.id).unwrap();
        seed
    }

    #[tokio::test]
    async fn successful_deploy_reaches_done() {
        let mut h = harness(&[], false, false);
        let baseline = seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Done);
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.failure.is_none());

        let deployed = outcome.release.unwrap();
        assert_ne!(deployed.id, baseline.id);
        assert_eq!(h.store.current_id().unwrap(), Some(deployed.id.clone()));
        assert_eq!(
            h.store.get(&deployed.id).unwrap().status,
            ReleaseStatus::Live
        );

        // The trail covers the whole path, starting with the intent.
        let records = h
            .orchestrator
            .trail
            .records_from(outcome.attempt_start_seq)
            .unwrap();
        assert_eq!(records[0].from_state, "idle");
        assert_eq!(records[0].to_state, "backup");
        assert!(records[0].reason.contains("requested"));
        assert_eq!(records.last().unwrap().to_state, "done");

        let notices = h.notifier.notices.lock().unwrap();
        assert!(matches!(notices[0], Notice::DeployCompleted { .. }));
    }

    #[tokio::test]
    async fn health_check_failure_leaves_live_release_untouched() {
        // Candidate evaluation fails; nothing live has changed yet.
        let mut h = harness(&[false], false, false);
        let baseline = seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::RolledBack);
        assert_eq!(outcome.failure, Some(FailureKind::Gate));
        assert_eq!(outcome.exit_code(), 1);

        // Current binding is unchanged; candidate is marked failed.
        assert_eq!(h.store.current_id().unwrap(), Some(baseline.id.clone()));
        let candidate = outcome.release.unwrap();
        assert_eq!(
            h.store.get(&candidate.id).unwrap().status,
            ReleaseStatus::Failed
        );
    }

    #[tokio::test]
    async fn post_verify_failure_reverts_to_previous() {
        // HealthCheck passes, PostVerify fails, re-verification after
        // the revert passes.
        let mut h = harness(&[true, false, true], false, false);
        let baseline = seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::RolledBack);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(h.store.current_id().unwrap(), Some(baseline.id.clone()));

        let candidate = outcome.release.unwrap();
        assert_eq!(
            h.store.get(&candidate.id).unwrap().status,
            ReleaseStatus::Failed
        );

        // The trail explains why the rollback happened.
        let records = h
            .orchestrator
            .trail
            .records_from(outcome.attempt_start_seq)
            .unwrap();
        let rollback = records
            .iter()
            .find(|r| r.to_state == "rolling-back")
            .unwrap();
        assert!(rollback.reason.contains("http"));
        assert_eq!(records.last().unwrap().to_state, "rolled-back");
    }

    #[tokio::test]
    async fn backup_failure_halts_without_touching_anything() {
        let mut h = harness(&[], true, false);
        let baseline = seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Halted);
        assert_eq!(outcome.exit_code(), 2);
        assert!(outcome.release.is_none());
        // Only the seeded release exists; no candidate was provisioned.
        assert_eq!(h.store.list().unwrap().len(), 1);
        assert_eq!(h.store.current_id().unwrap(), Some(baseline.id));

        let notices = h.notifier.notices.lock().unwrap();
        assert!(matches!(notices[0], Notice::DeployHalted { .. }));
    }

    #[tokio::test]
    async fn migration_failure_discards_candidate() {
        let mut h = harness(&[], false, true);
        let baseline = seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::RolledBack);
        assert_eq!(outcome.failure, Some(FailureKind::Infra));
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(h.store.current_id().unwrap(), Some(baseline.id));
        let candidate = outcome.release.unwrap();
        assert_eq!(
            h.store.get(&candidate.id).unwrap().status,
            ReleaseStatus::Failed
        );
    }

    #[tokio::test]
    async fn failed_reverification_after_revert_halts() {
        // PostVerify fails, then the reverted environment also fails
        // re-verification: the engine cannot claim a safe state.
        let mut h = harness(&[true, false, false], false, false);
        seed_live(&h);

        let outcome = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap();

        assert_eq!(outcome.state, DeployState::Halted);
        assert_eq!(outcome.exit_code(), 2);

        let notices = h.notifier.notices.lock().unwrap();
        assert!(matches!(
            notices[0],
            Notice::ManualInterventionRequired { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_deploy_fails_fast() {
        let mut h = harness(&[], false, false);
        seed_live(&h);

        let _held = DeployLock::acquire(h.store.root()).unwrap();
        let err = h
            .orchestrator
            .run(h.artifact.path(), "engine")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::AlreadyInProgress(_)));
    }
}
