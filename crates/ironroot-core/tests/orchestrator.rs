mod common;

use common::{orchestrator, state_context, ScriptedGate, ScriptedOperator};
use ironroot_config::InstallContext;
use ironroot_core::{
    CoreError, HealthResult, InstallLock, InstallOutcome, Orchestrator, Phase, StageStatus,
};
use ironroot_ledger::{JournalEntry, LedgerJournal, ResourceKind, ResourceLedger};
use ironroot_stages::{
    MockFailure, MockStage, RecordingRunner, ReleaseLog, SharedRunner, Stage, StageError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runs the wrapped stage, then raises the shutdown flag as a signal would.
struct SignalAfter {
    inner: MockStage,
    flag: Arc<AtomicBool>,
}

impl Stage for SignalAfter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let result = self.inner.run(ctx, ledger);
        self.flag.store(true, Ordering::SeqCst);
        result
    }
}

fn released(log: &ReleaseLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn fatal_failure_releases_exactly_what_was_acquired() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let a = MockStage::new("a")
        .acquires(ResourceKind::Mapping, "m1")
        .with_release_log(&log);
    let b = MockStage::new("b")
        .acquires(ResourceKind::Pool, "p1")
        .with_release_log(&log);
    let c = MockStage::new("c")
        .acquires(ResourceKind::MountPoint, "/x")
        .fails(MockFailure::BeforeAcquire)
        .with_release_log(&log);
    let d = MockStage::new("d").with_release_log(&log);
    let d_runs = d.run_counter();

    let mut orch = orchestrator(
        vec![Box::new(a), Box::new(b), Box::new(c), Box::new(d)],
        ScriptedGate::default(),
    );
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(released(&log), vec!["p1", "m1"]);
    assert_eq!(d_runs.load(Ordering::SeqCst), 0);
    assert!(
        matches!(report.outcome, InstallOutcome::Failed { ref error } if error.contains("c failed"))
    );
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.cleanup.released.len(), 2);
    assert_eq!(report.stages.len(), 3);
    assert!(matches!(report.stages[2].status, StageStatus::Failed(_)));
    assert_eq!(orch.phase(), Phase::Failed);
    assert!(!orch.phases().contains(&Phase::Finalize));
    assert!(!LedgerJournal::new(state.path()).path().exists());
}

#[test]
fn successful_run_finalizes_and_cleanup_finds_nothing_left() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(
            MockStage::new("disk")
                .acquires(ResourceKind::BlockDevice, "/dev/sda")
                .with_health_check("disk")
                .with_release_log(&log),
        ),
        Box::new(
            MockStage::new("pool")
                .acquires(ResourceKind::Pool, "rpool")
                .acquires(ResourceKind::MountPoint, "/mnt/ironroot")
                .with_health_check("pool")
                .with_release_log(&log),
        ),
    ];
    let gate = ScriptedGate::default();
    let checks = Arc::clone(&gate.calls);
    let mut orch = orchestrator(stages, gate);
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(report.outcome, InstallOutcome::Success);
    assert_eq!(report.exit_code(), 0);
    assert!(report.warnings.is_empty());
    assert!(report.cleanup.is_clean());
    assert_eq!(released(&log), vec!["/mnt/ironroot", "rpool", "/dev/sda"]);
    assert_eq!(*checks.lock().unwrap(), vec!["disk", "pool", "final"]);
    assert_eq!(report.final_health, Some(HealthResult::Pass));
    assert_eq!(
        report.phases,
        vec![
            Phase::Init,
            Phase::Configure,
            Phase::PivotCheck,
            Phase::Stage,
            Phase::Stage,
            Phase::FinalHealthCheck,
            Phase::Finalize,
            Phase::Cleanup,
            Phase::Done,
        ]
    );
}

#[test]
fn validation_never_runs_a_stage() {
    let a = MockStage::new("a").acquires(ResourceKind::Pool, "p1");
    let runs = a.run_counter();
    let b = MockStage::new("b").requires(&["pool.name"]);
    let b_runs = b.run_counter();
    let mut orch = orchestrator(vec![Box::new(a), Box::new(b)], ScriptedGate::default());

    let err = orch.validate(&InstallContext::new()).unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains("pool.name"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(b_runs.load(Ordering::SeqCst), 0);
    assert_eq!(orch.phase(), Phase::Failed);

    let mut ctx = InstallContext::new();
    ctx.set("pool.name", "rpool");
    let mut orch = orchestrator(
        vec![Box::new(MockStage::new("b").requires(&["pool.name"]))],
        ScriptedGate::default(),
    );
    orch.validate(&ctx).unwrap();
    assert_eq!(
        orch.phases(),
        &[Phase::Init, Phase::Configure, Phase::ValidateOnly, Phase::Done]
    );
}

#[test]
fn missing_key_fails_before_any_stage() {
    let state = tempfile::tempdir().unwrap();
    let a = MockStage::new("a").acquires(ResourceKind::Pool, "p1");
    let runs = a.run_counter();
    let b = MockStage::new("b").requires(&["disks"]);
    let mut orch = orchestrator(vec![Box::new(a), Box::new(b)], ScriptedGate::default());

    let err = orch.run(state_context(state.path())).unwrap_err();
    assert!(matches!(err, CoreError::Precondition(ref m) if m.contains("disks")));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(orch.phase(), Phase::Failed);
}

#[test]
fn recoverable_failure_completes_with_warnings() {
    let state = tempfile::tempdir().unwrap();
    let net = MockStage::new("network")
        .recoverable()
        .fails(MockFailure::BeforeAcquire);
    let after = MockStage::new("after");
    let after_runs = after.run_counter();
    let operator = ScriptedOperator::new(true);
    let asked = Arc::clone(&operator.asked);

    let mut orch = orchestrator(vec![Box::new(net), Box::new(after)], ScriptedGate::default())
        .with_operator(Box::new(operator));
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(report.outcome, InstallOutcome::SuccessWithWarnings);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(after_runs.load(Ordering::SeqCst), 1);
    assert_eq!(*asked.lock().unwrap(), vec!["network"]);
    assert!(report.warnings[0].starts_with("network:"));
    assert!(matches!(report.stages[0].status, StageStatus::Degraded(_)));
}

#[test]
fn declined_recoverable_failure_aborts() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let pool = MockStage::new("pool")
        .acquires(ResourceKind::Pool, "rpool")
        .with_release_log(&log);
    let net = MockStage::new("network")
        .recoverable()
        .fails(MockFailure::BeforeAcquire);
    let mut orch = orchestrator(vec![Box::new(pool), Box::new(net)], ScriptedGate::default())
        .with_operator(Box::new(ScriptedOperator::new(false)));

    let report = orch.run(state_context(state.path())).unwrap();
    assert!(
        matches!(report.outcome, InstallOutcome::Failed { ref error } if error.contains("declined"))
    );
    assert_eq!(released(&log), vec!["rpool"]);
}

#[test]
fn health_failure_on_fatal_stage_aborts_and_unwinds() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let pool = MockStage::new("pool")
        .acquires(ResourceKind::Pool, "rpool")
        .with_health_check("pool")
        .with_release_log(&log);
    let system = MockStage::new("system");
    let system_runs = system.run_counter();
    let gate = ScriptedGate::default().with("pool", HealthResult::Fail("DEGRADED".to_owned()));

    let mut orch = orchestrator(vec![Box::new(pool), Box::new(system)], gate);
    let report = orch.run(state_context(state.path())).unwrap();

    assert!(
        matches!(report.outcome, InstallOutcome::Failed { ref error } if error.contains("DEGRADED"))
    );
    assert_eq!(system_runs.load(Ordering::SeqCst), 0);
    assert_eq!(released(&log), vec!["rpool"]);
    assert_eq!(
        report.stages[0].health,
        Some(HealthResult::Fail("DEGRADED".to_owned()))
    );
}

#[test]
fn health_warning_never_asks_the_operator() {
    let state = tempfile::tempdir().unwrap();
    let stage = MockStage::new("network")
        .recoverable()
        .with_health_check("network");
    let gate = ScriptedGate::default().with("network", HealthResult::Warn("mode none".to_owned()));
    let operator = ScriptedOperator::new(false);
    let asked = Arc::clone(&operator.asked);

    let mut orch = orchestrator(vec![Box::new(stage)], gate).with_operator(Box::new(operator));
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(report.outcome, InstallOutcome::SuccessWithWarnings);
    assert!(asked.lock().unwrap().is_empty());
    assert_eq!(report.warnings, vec!["network: mode none"]);
}

#[test]
fn final_health_failure_is_fatal() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let stage = MockStage::new("system")
        .acquires(ResourceKind::MountPoint, "/mnt/ironroot")
        .with_release_log(&log);
    let gate = ScriptedGate::default().with(
        "final",
        HealthResult::Fail("bootloader: no EFI loader".to_owned()),
    );

    let mut orch = orchestrator(vec![Box::new(stage)], gate);
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(report.exit_code(), 1);
    assert_eq!(released(&log), vec!["/mnt/ironroot"]);
    assert!(!report.phases.contains(&Phase::Finalize));
}

#[test]
fn concurrent_install_is_refused() {
    let state = tempfile::tempdir().unwrap();
    let _held = InstallLock::try_acquire(&state.path().join("install.lock"))
        .unwrap()
        .unwrap();
    let stage = MockStage::new("disk");
    let runs = stage.run_counter();

    let mut orch = orchestrator(vec![Box::new(stage)], ScriptedGate::default());
    let err = orch.run(state_context(state.path())).unwrap_err();
    assert!(matches!(err, CoreError::InstallRunning(_)));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn leftovers_from_a_crashed_run_are_released_first() {
    let state = tempfile::tempdir().unwrap();
    LedgerJournal::new(state.path())
        .record(&[
            JournalEntry {
                kind: ResourceKind::Pool,
                identifier: "rpool".to_owned(),
                acquired_at: 0,
                timestamp: "2026-01-01T00:00:00Z".to_owned(),
            },
            JournalEntry {
                kind: ResourceKind::MountPoint,
                identifier: "/mnt/stale".to_owned(),
                acquired_at: 1,
                timestamp: "2026-01-01T00:00:01Z".to_owned(),
            },
        ])
        .unwrap();
    let recording = Arc::new(RecordingRunner::new());
    let runner: SharedRunner = recording.clone();

    let mut orch = Orchestrator::new(
        vec![Box::new(MockStage::new("disk"))],
        Box::new(ScriptedGate::default()),
        runner,
    );
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(report.outcome, InstallOutcome::Success);
    let ids: Vec<_> = report
        .recovered
        .released
        .iter()
        .map(|r| r.identifier.as_str())
        .collect();
    assert_eq!(ids, vec!["/mnt/stale", "rpool"]);
    let lines = recording.command_lines();
    let umount = lines.iter().position(|l| l == "umount /mnt/stale").unwrap();
    let export = lines.iter().position(|l| l == "zpool export rpool").unwrap();
    assert!(umount < export);
}

#[test]
fn dry_run_leaves_no_state_behind() {
    let state = tempfile::tempdir().unwrap();
    let stage = MockStage::new("pool").acquires(ResourceKind::Pool, "rpool");
    let mut orch = orchestrator(vec![Box::new(stage)], ScriptedGate::default()).dry_run(true);

    let report = orch.run(state_context(state.path())).unwrap();
    assert!(report.succeeded());
    assert!(!state.path().join("install.lock").exists());
    assert!(!state.path().join("ledger.json").exists());
}

#[test]
fn report_serializes_for_json_output() {
    let state = tempfile::tempdir().unwrap();
    let mut orch = orchestrator(
        vec![Box::new(MockStage::new("disk").with_health_check("disk"))],
        ScriptedGate::default(),
    );
    let report = orch.run(state_context(state.path())).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();

    assert_eq!(json["outcome"]["result"], "success");
    assert_eq!(json["stages"][0]["name"], "disk");
    assert_eq!(json["stages"][0]["status"]["status"], "passed");
    assert_eq!(json["stages"][0]["health"]["status"], "pass");
    assert_eq!(json["phases"][0], "init");
}

#[test]
fn shutdown_between_stages_unwinds_and_skips_the_rest() {
    let state = tempfile::tempdir().unwrap();
    let log = ReleaseLog::default();
    let shutdown = Arc::new(AtomicBool::new(false));
    let a = MockStage::new("a")
        .acquires(ResourceKind::Mapping, "m1")
        .with_release_log(&log);
    let b = SignalAfter {
        inner: MockStage::new("b")
            .acquires(ResourceKind::Pool, "p1")
            .with_release_log(&log),
        flag: Arc::clone(&shutdown),
    };
    let c = MockStage::new("c")
        .acquires(ResourceKind::MountPoint, "/x")
        .with_release_log(&log);
    let c_runs = c.run_counter();
    let gate = ScriptedGate::default();
    let checks = Arc::clone(&gate.calls);

    let mut orch = orchestrator(vec![Box::new(a), Box::new(b), Box::new(c)], gate)
        .with_shutdown(Arc::clone(&shutdown));
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(c_runs.load(Ordering::SeqCst), 0);
    assert_eq!(released(&log), vec!["p1", "m1"]);
    let order: Vec<&str> = report
        .cleanup
        .released
        .iter()
        .map(|r| r.identifier.as_str())
        .collect();
    assert_eq!(order, vec!["p1", "m1"]);
    assert!(
        matches!(report.outcome, InstallOutcome::Failed { ref error } if error.contains("cancelled"))
    );
    assert_eq!(report.exit_code(), 1);
    assert!(!checks.lock().unwrap().contains(&"final".to_owned()));
    assert!(!orch.phases().contains(&Phase::FinalHealthCheck));
    assert_eq!(orch.phase(), Phase::Failed);
    assert!(!LedgerJournal::new(state.path()).path().exists());
}

#[test]
fn shutdown_before_the_first_stage_touches_nothing() {
    let state = tempfile::tempdir().unwrap();
    let stage = MockStage::new("disk").acquires(ResourceKind::BlockDevice, "/dev/sda");
    let runs = stage.run_counter();

    let mut orch = orchestrator(vec![Box::new(stage)], ScriptedGate::default())
        .with_shutdown(Arc::new(AtomicBool::new(true)));
    let report = orch.run(state_context(state.path())).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(report.cleanup.is_empty());
    assert!(matches!(report.outcome, InstallOutcome::Failed { .. }));
}
