//! The canary rollout controller.
//!
//! Walks an ordered list of (weight, soak) stages. Each stage raises
//! the candidate's traffic weight, soaks, then evaluates the health
//! battery and the metrics gate before promotion. Any breach aborts:
//! traffic snaps back to 0% immediately — holding nonzero traffic on a
//! known-bad candidate is strictly worse than an instant cut, so there
//! is no gradual ramp-down.
//!
//! The soak wait races against an operator abort signal, so an abort
//! is honored mid-soak, not only at stage boundaries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use cutover_audit::AuditTrail;
use cutover_core::{CheckName, DeployResult, Release, ReleaseStatus, Target};
use cutover_health::HealthEvaluator;
use cutover_metrics::MetricsGate;
use cutover_release::{DeployLock, ReleaseStore};
use cutover_traffic::TrafficSplitter;

use crate::machine::FailureKind;
use crate::notify::{Notice, Notifier};
use crate::plan::CanaryPlan;

/// States of a canary rollout. Stage indexes are 0-based internally
/// and rendered 1-based for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryState {
    Pending,
    Promoting(usize),
    Soaking(usize),
    Evaluating(usize),
    /// Terminal: reached 100% and the final evaluation passed.
    Completed,
    Aborting,
    /// Terminal: candidate receives zero traffic.
    Aborted,
    /// Terminal: the engine could not reach a safe state on its own.
    Halted,
}

impl fmt::Display for CanaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanaryState::Pending => write!(f, "pending"),
            CanaryState::Promoting(i) => write!(f, "promoting-{}", i + 1),
            CanaryState::Soaking(i) => write!(f, "soaking-{}", i + 1),
            CanaryState::Evaluating(i) => write!(f, "evaluating-{}", i + 1),
            CanaryState::Completed => write!(f, "completed"),
            CanaryState::Aborting => write!(f, "aborting"),
            CanaryState::Aborted => write!(f, "aborted"),
            CanaryState::Halted => write!(f, "halted"),
        }
    }
}

/// Terminal result of a canary attempt.
#[derive(Debug)]
pub struct CanaryOutcome {
    pub state: CanaryState,
    pub failure: Option<FailureKind>,
    pub attempt_start_seq: u64,
}

impl CanaryOutcome {
    /// CLI exit code: 0 completed, 1 safe abort (gate breach or
    /// operator abort), 2 infrastructure error or unresolved state.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            CanaryState::Completed => 0,
            CanaryState::Aborted if self.failure != Some(FailureKind::Infra) => 1,
            _ => 2,
        }
    }
}

enum SoakResult {
    Finished,
    AbortRequested,
}

/// Drives a canary rollout for one environment.
pub struct CanaryController {
    store: ReleaseStore,
    evaluator: HealthEvaluator,
    gate: MetricsGate,
    splitter: Arc<dyn TrafficSplitter>,
    trail: AuditTrail,
    notifier: Arc<dyn Notifier>,
    required_checks: Vec<CheckName>,
    candidate_target: Target,
    abort_rx: watch::Receiver<bool>,
}

impl CanaryController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ReleaseStore,
        evaluator: HealthEvaluator,
        gate: MetricsGate,
        splitter: Arc<dyn TrafficSplitter>,
        trail: AuditTrail,
        notifier: Arc<dyn Notifier>,
        required_checks: Vec<CheckName>,
        candidate_target: Target,
        abort_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            evaluator,
            gate,
            splitter,
            trail,
            notifier,
            required_checks,
            candidate_target,
            abort_rx,
        }
    }

    /// Run the plan against an already-provisioned candidate release.
    ///
    /// Holds the environment's deploy lock for the whole attempt.
    pub async fn run(
        &mut self,
        candidate: &Release,
        plan: &CanaryPlan,
        actor: &str,
    ) -> DeployResult<CanaryOutcome> {
        let _lock = DeployLock::acquire(self.store.root())?;
        let attempt_start_seq = self.trail.next_seq();
        info!(
            env = %self.store.env(),
            candidate = %candidate.id,
            stages = plan.stages().len(),
            "canary rollout starting"
        );

        let mut state = CanaryState::Pending;
        let mut failure: Option<FailureKind> = None;

        for (i, stage) in plan.stages().iter().enumerate() {
            // Promote to this stage's weight.
            state = self.step(
                actor,
                state,
                CanaryState::Promoting(i),
                &format!("raising candidate weight to {}%", stage.weight_percent),
                candidate,
            )?;
            if let Err(e) = self
                .splitter
                .set_weight(&candidate.id, stage.weight_percent)
                .await
            {
                failure = Some(FailureKind::Infra);
                state = self
                    .abort(actor, state, candidate, &format!("failed to apply weight: {e}"))
                    .await?;
                break;
            }

            // Hold the weight for the soak period.
            state = self.step(
                actor,
                state,
                CanaryState::Soaking(i),
                &format!(
                    "soaking at {}% for {}s",
                    stage.weight_percent,
                    stage.soak.as_secs()
                ),
                candidate,
            )?;
            if matches!(self.soak(stage.soak).await, SoakResult::AbortRequested) {
                state = self.abort(actor, state, candidate, "operator abort").await?;
                break;
            }

            // Evaluate both gates before advancing.
            state = self.step(
                actor,
                state,
                CanaryState::Evaluating(i),
                "soak complete, evaluating gates",
                candidate,
            )?;

            let report = self
                .evaluator
                .evaluate(&self.candidate_target, &self.required_checks)
                .await;
            if !report.overall {
                failure = Some(FailureKind::Gate);
                state = self
                    .abort(
                        actor,
                        state,
                        candidate,
                        &format!(
                            "required health checks failed: {}",
                            report.failure_summary(&self.required_checks)
                        ),
                    )
                    .await?;
                break;
            }

            let verdict = self
                .gate
                .check(&candidate.id, stage.soak, &stage.thresholds)
                .await;
            if !verdict.pass {
                failure = Some(FailureKind::Gate);
                state = self
                    .abort(
                        actor,
                        state,
                        candidate,
                        &format!("metrics gate failed: {}", verdict.diagnostic),
                    )
                    .await?;
                break;
            }

            info!(
                candidate = %candidate.id,
                stage = i + 1,
                weight = stage.weight_percent,
                "stage passed"
            );
        }

        if !matches!(state, CanaryState::Aborted | CanaryState::Halted) {
            state = self.finalize(actor, state, candidate).await?;
        }
        if state == CanaryState::Halted {
            failure = Some(FailureKind::Infra);
        }

        info!(env = %self.store.env(), state = %state, "canary rollout finished");
        Ok(CanaryOutcome {
            state,
            failure,
            attempt_start_seq,
        })
    }

    /// Make the candidate the permanent stable release.
    ///
    /// The pointer rebind supersedes the 100% traffic weight; the
    /// weight artifact is then reset so the routing layer serves the
    /// (new) stable side only.
    async fn finalize(
        &mut self,
        actor: &str,
        from: CanaryState,
        candidate: &Release,
    ) -> DeployResult<CanaryState> {
        self.audit(
            actor,
            from,
            CanaryState::Completed,
            "all stages passed; promoting candidate to stable",
            candidate,
        )?;

        if let Err(e) = self.store.switch(&candidate.id) {
            let detail = format!("failed to rebind current pointer: {e}");
            self.audit(actor, CanaryState::Completed, CanaryState::Halted, &detail, candidate)?;
            self.notifier
                .notify(&Notice::ManualInterventionRequired { reason: detail });
            return Ok(CanaryState::Halted);
        }

        // Candidate is stable now; route everything through the stable
        // side again. Failure here leaves traffic on the same release
        // either way, so it does not fail the rollout.
        if let Err(e) = self.splitter.set_weight(&candidate.id, 0).await {
            warn!(error = %e, "failed to reset weight artifact after promotion");
        }

        self.notifier.notify(&Notice::CanaryCompleted {
            release: candidate.id.clone(),
        });
        Ok(CanaryState::Completed)
    }

    /// Cut the candidate to 0% and record the abort. If even the cut
    /// fails, the rollout halts in an unresolved state.
    async fn abort(
        &mut self,
        actor: &str,
        from: CanaryState,
        candidate: &Release,
        reason: &str,
    ) -> DeployResult<CanaryState> {
        warn!(candidate = %candidate.id, %reason, "aborting canary");
        self.audit(actor, from, CanaryState::Aborting, reason, candidate)?;
        self.store.set_status(&candidate.id, ReleaseStatus::Failed)?;

        match self.splitter.set_weight(&candidate.id, 0).await {
            Ok(()) => {
                self.audit(
                    actor,
                    CanaryState::Aborting,
                    CanaryState::Aborted,
                    "traffic reverted to 0%",
                    candidate,
                )?;
                self.notifier.notify(&Notice::CanaryAborted {
                    release: candidate.id.clone(),
                    reason: reason.to_string(),
                });
                Ok(CanaryState::Aborted)
            }
            Err(e) => {
                let detail = format!("failed to revert traffic to 0%: {e}");
                self.audit(
                    actor,
                    CanaryState::Aborting,
                    CanaryState::Halted,
                    &detail,
                    candidate,
                )?;
                self.notifier
                    .notify(&Notice::ManualInterventionRequired { reason: detail });
                Ok(CanaryState::Halted)
            }
        }
    }

    /// Sleep for the soak period, racing the operator abort signal.
    async fn soak(&self, duration: Duration) -> SoakResult {
        let mut abort_rx = self.abort_rx.clone();
        if *abort_rx.borrow_and_update() {
            return SoakResult::AbortRequested;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return SoakResult::Finished,
                changed = abort_rx.changed() => match changed {
                    Ok(()) if *abort_rx.borrow_and_update() => {
                        return SoakResult::AbortRequested;
                    }
                    Ok(()) => {} // signal cleared; keep soaking
                    Err(_) => {
                        // Sender gone; nobody can abort any more.
                        sleep.as_mut().await;
                        return SoakResult::Finished;
                    }
                },
            }
        }
    }

    /// Record a transition, then return the new state.
    fn step(
        &mut self,
        actor: &str,
        from: CanaryState,
        to: CanaryState,
        reason: &str,
        candidate: &Release,
    ) -> DeployResult<CanaryState> {
        self.audit(actor, from, to, reason, candidate)?;
        Ok(to)
    }

    fn audit(
        &mut self,
        actor: &str,
        from: CanaryState,
        to: CanaryState,
        reason: &str,
        candidate: &Release,
    ) -> DeployResult<()> {
        self.trail.append(
            actor,
            &from.to_string(),
            &to.to_string(),
            reason,
            Some(&candidate.id),
        )?;
        Ok(())
    }
}
