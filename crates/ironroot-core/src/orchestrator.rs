use crate::concurrency::{install_signal_handler, shutdown_flag, InstallLock};
use crate::guard::CleanupGuard;
use crate::health::{HealthGate, HealthResult};
use crate::lifecycle::{validate_transition, Phase};
use crate::operator::{Operator, UnattendedOperator};
use crate::pivot::Pivot;
use crate::CoreError;
use ironroot_config::{keys, InstallContext};
use ironroot_ledger::{recover_journal, LedgerJournal, ReleaseReport, ResourceLedger};
use ironroot_stages::{release_resource, Criticality, SharedRunner, Stage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DEFAULT_STATE_DIR: &str = "/run/ironroot";
const LOCK_FILE: &str = "install.lock";
const INSTALLED_LOG: &str = "var/log/ironroot-install.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum InstallOutcome {
    Success,
    SuccessWithWarnings,
    /// The run was handed to a relocated installer that exited with this code.
    HandedOff { exit_code: i32 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum StageStatus {
    Passed,
    /// A recoverable failure the run continued past.
    Degraded(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub criticality: Criticality,
    pub status: StageStatus,
    pub health: Option<HealthResult>,
}

/// What happened during one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: InstallOutcome,
    pub phases: Vec<Phase>,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
    pub final_health: Option<HealthResult>,
    /// Resources left by an interrupted earlier run and released at start.
    pub recovered: ReleaseReport,
    pub cleanup: ReleaseReport,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            InstallOutcome::Success | InstallOutcome::SuccessWithWarnings => 0,
            InstallOutcome::HandedOff { exit_code } => *exit_code,
            InstallOutcome::Failed { .. } => 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == 0
    }
}

enum Completion {
    Installed,
    HandedOff(i32),
}

/// Drives the install sequence through its phases.
///
/// Resources are owned by a [`CleanupGuard`] created before anything else
/// happens, and every exit path (finalize, fatal failure, cancellation,
/// precondition failure) goes through the guard's single release.
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    health: Box<dyn HealthGate>,
    operator: Box<dyn Operator>,
    runner: SharedRunner,
    pivot: Option<Pivot>,
    shutdown: Arc<AtomicBool>,
    dry_run: bool,
    phase: Phase,
    phases: Vec<Phase>,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>, health: Box<dyn HealthGate>, runner: SharedRunner) -> Self {
        Self {
            stages,
            health,
            operator: Box::new(UnattendedOperator),
            runner,
            pivot: None,
            shutdown: shutdown_flag(),
            dry_run: false,
            phase: Phase::Init,
            phases: vec![Phase::Init],
        }
    }

    #[must_use]
    pub fn with_operator(mut self, operator: Box<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    /// Relocate before the first stage unless already relocated.
    #[must_use]
    pub fn with_pivot(mut self, pivot: Pivot) -> Self {
        self.pivot = Some(pivot.with_shutdown(Arc::clone(&self.shutdown)));
        self
    }

    /// Watch `flag` instead of the process-wide signal flag.
    #[must_use]
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.pivot = self.pivot.take().map(|p| p.with_shutdown(Arc::clone(&flag)));
        self.shutdown = flag;
        self
    }

    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Skip the crash journal and install lock, which only guard real
    /// resources.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Phases entered so far, starting with `Init`.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    fn enter(&mut self, next: Phase) -> Result<(), CoreError> {
        validate_transition(self.phase, next)?;
        debug!("phase {} -> {next}", self.phase);
        self.phase = next;
        self.phases.push(next);
        Ok(())
    }

    /// Check every stage precondition against `ctx`, reporting all problems.
    fn check_preconditions(&self, ctx: &InstallContext) -> Result<(), CoreError> {
        let problems: Vec<String> = self
            .stages
            .iter()
            .filter_map(|stage| {
                stage
                    .precondition(ctx)
                    .err()
                    .map(|e| format!("{}: {e}", stage.name()))
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Precondition(problems.join("; ")))
        }
    }

    /// Validation-only run: preconditions are checked and nothing else.
    /// No ledger exists and no stage runs.
    pub fn validate(&mut self, ctx: &InstallContext) -> Result<(), CoreError> {
        self.enter(Phase::Configure)?;
        self.enter(Phase::ValidateOnly)?;
        let result = self.check_preconditions(ctx);
        match &result {
            Ok(()) => {
                info!("validation passed");
                self.enter(Phase::Done)?;
            }
            Err(e) => {
                warn!("validation failed: {e}");
                self.enter(Phase::Failed)?;
            }
        }
        result
    }

    /// Run the install. Precondition-class failures (missing keys, a
    /// concurrent install) are returned as errors; everything after that
    /// point is reported through [`RunReport::outcome`].
    pub fn run(&mut self, mut ctx: InstallContext) -> Result<RunReport, CoreError> {
        install_signal_handler();
        let state_dir = PathBuf::from(ctx.get(keys::STATE_DIR).unwrap_or(DEFAULT_STATE_DIR));
        let ledger = if self.dry_run {
            ResourceLedger::new()
        } else {
            ResourceLedger::with_journal(LedgerJournal::new(&state_dir))
        };
        let mut guard = CleanupGuard::new(ledger);
        let mut report = RunReport {
            outcome: InstallOutcome::Success,
            phases: Vec::new(),
            stages: Vec::new(),
            warnings: Vec::new(),
            final_health: None,
            recovered: ReleaseReport::default(),
            cleanup: ReleaseReport::default(),
        };
        let mut lock = None;

        let result = self.execute(&mut ctx, &mut guard, &mut report, &state_dir, &mut lock);

        self.enter(Phase::Cleanup)?;
        let late = guard.release();
        if !late.is_empty() {
            info!("cleanup released {} resources", late.attempted());
        }
        report.cleanup.merge(late);
        for failure in &report.cleanup.failures {
            report.warnings.push(format!(
                "cleanup: {} {}: {}",
                failure.kind, failure.identifier, failure.error
            ));
        }
        drop(lock);

        let outcome = match result {
            Ok(Completion::Installed) => {
                self.enter(Phase::Done)?;
                if report.warnings.is_empty() {
                    InstallOutcome::Success
                } else {
                    InstallOutcome::SuccessWithWarnings
                }
            }
            Ok(Completion::HandedOff(exit_code)) => {
                self.enter(if exit_code == 0 { Phase::Done } else { Phase::Failed })?;
                InstallOutcome::HandedOff { exit_code }
            }
            Err(e) if e.is_precondition() => {
                self.enter(Phase::Failed)?;
                error!("{e}");
                return Err(e);
            }
            Err(e) => {
                self.enter(Phase::Failed)?;
                error!("install failed: {e}");
                InstallOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        info!("install finished: {outcome:?}");
        report.outcome = outcome;
        report.phases = self.phases.clone();
        Ok(report)
    }

    fn execute(
        &mut self,
        ctx: &mut InstallContext,
        guard: &mut CleanupGuard,
        report: &mut RunReport,
        state_dir: &Path,
        lock: &mut Option<InstallLock>,
    ) -> Result<Completion, CoreError> {
        if let Some(work_dir) = ctx.get(keys::WORK_DIR) {
            std::fs::create_dir_all(work_dir)?;
        }

        self.enter(Phase::Configure)?;
        self.check_preconditions(ctx)?;

        self.enter(Phase::PivotCheck)?;
        if self.should_pivot(ctx) {
            self.enter(Phase::Pivot)?;
            if let Some(pivot) = &self.pivot {
                let code = pivot.relocate(ctx)?;
                return Ok(Completion::HandedOff(code));
            }
        }

        if !self.dry_run {
            let lock_path = state_dir.join(LOCK_FILE);
            *lock = Some(
                InstallLock::try_acquire(&lock_path)?
                    .ok_or(CoreError::InstallRunning(lock_path))?,
            );
            report.recovered = self.recover_previous_run(state_dir)?;
        }

        for index in 0..self.stages.len() {
            if self.cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.enter(Phase::Stage)?;
            self.run_stage(index, ctx, guard, report)?;
        }

        if self.cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.enter(Phase::FinalHealthCheck)?;
        let final_health = self.health.check("final", ctx);
        info!("final health: {final_health}");
        report.final_health = Some(final_health.clone());
        match final_health {
            HealthResult::Pass => {}
            HealthResult::Warn(details) => report.warnings.push(format!("final: {details}")),
            HealthResult::Fail(details) => {
                return Err(CoreError::HealthFailed {
                    check: "final".to_owned(),
                    details,
                })
            }
        }

        self.enter(Phase::Finalize)?;
        self.finalize(ctx, guard, report);
        Ok(Completion::Installed)
    }

    fn should_pivot(&self, ctx: &InstallContext) -> bool {
        let Some(pivot) = &self.pivot else {
            info!("pivot disabled");
            return false;
        };
        if pivot.is_relocated() {
            info!("already running from the pivot root");
            false
        } else if !ctx.flag(keys::PIVOT_ENABLED) {
            info!("pivot disabled by configuration");
            false
        } else {
            true
        }
    }

    fn recover_previous_run(&self, state_dir: &Path) -> Result<ReleaseReport, CoreError> {
        let journal = LedgerJournal::new(state_dir);
        let runner = self.runner.as_ref();
        let recovered = recover_journal(&journal, |entry| {
            release_resource(runner, entry.kind, &entry.identifier)
        })?;
        if !recovered.is_empty() {
            warn!(
                "released {} resources left by an interrupted run",
                recovered.attempted()
            );
        }
        Ok(recovered)
    }

    fn run_stage(
        &self,
        index: usize,
        ctx: &mut InstallContext,
        guard: &mut CleanupGuard,
        report: &mut RunReport,
    ) -> Result<(), CoreError> {
        let stage = &self.stages[index];
        let name = stage.name().to_owned();
        info!("stage {name}: starting");
        let mut record = StageRecord {
            name: name.clone(),
            criticality: stage.criticality(),
            status: StageStatus::Passed,
            health: None,
        };

        let result = self.attempt(stage.as_ref(), ctx, guard.ledger_mut(), &mut record);
        if let Some(HealthResult::Warn(details)) = &record.health {
            report.warnings.push(format!("{name}: {details}"));
        }
        let Err(e) = result else {
            info!("stage {name}: done");
            report.stages.push(record);
            return Ok(());
        };

        let message = e.to_string();
        match stage.criticality() {
            Criticality::Fatal => {
                error!("stage {name}: fatal failure: {message}");
                record.status = StageStatus::Failed(message);
                report.stages.push(record);
                Err(e)
            }
            Criticality::Recoverable => {
                warn!("stage {name}: recoverable failure: {message}");
                if self.operator.confirm_continue(&name, &message) {
                    report.warnings.push(format!("{name}: {message}"));
                    record.status = StageStatus::Degraded(message);
                    report.stages.push(record);
                    Ok(())
                } else {
                    record.status = StageStatus::Failed(message);
                    report.stages.push(record);
                    Err(CoreError::Declined { stage: name })
                }
            }
        }
    }

    /// Run one stage action, then its health check.
    fn attempt(
        &self,
        stage: &dyn Stage,
        ctx: &mut InstallContext,
        ledger: &mut ResourceLedger,
        record: &mut StageRecord,
    ) -> Result<(), CoreError> {
        stage.run(ctx, ledger).map_err(|source| CoreError::Stage {
            stage: stage.name().to_owned(),
            source,
        })?;
        let Some(check) = stage.health_check() else {
            return Ok(());
        };
        let result = self.health.check(check, ctx);
        info!("health {check}: {result}");
        record.health = Some(result.clone());
        match result {
            HealthResult::Fail(details) => Err(CoreError::HealthFailed {
                check: check.to_owned(),
                details,
            }),
            HealthResult::Pass | HealthResult::Warn(_) => Ok(()),
        }
    }

    /// Happy-path teardown: keep the log in the target, then release through
    /// the same guard the failure path uses.
    fn finalize(&self, ctx: &InstallContext, guard: &mut CleanupGuard, report: &mut RunReport) {
        if !self.dry_run {
            if let (Some(log), Some(altroot)) = (ctx.get(keys::LOG_PATH), ctx.get(keys::POOL_ALTROOT)) {
                let dest = Path::new(altroot).join(INSTALLED_LOG);
                let copied = dest
                    .parent()
                    .map_or(Ok(()), std::fs::create_dir_all)
                    .and_then(|()| std::fs::copy(log, &dest));
                match copied {
                    Ok(_) => info!("install log copied to {}", dest.display()),
                    Err(e) => warn!("failed to copy install log to {}: {e}", dest.display()),
                }
            }
        }
        let released = guard.release();
        info!("finalize released {} resources", released.attempted());
        report.cleanup.merge(released);
    }
}
