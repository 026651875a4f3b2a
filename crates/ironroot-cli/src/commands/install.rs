use super::prompt::DialoguerOperator;
use super::{
    colorize_outcome, is_interactive, is_root, json_pretty, obtain_config, spin_fail, spin_ok,
    spin_warn, spinner, Failure, EXIT_INSTALL_FAILED, EXIT_NOT_ROOT, EXIT_PRECONDITION,
};
use crate::logging;
use console::Style;
use ironroot_config::{keys, validate_config, EncryptionMode, InstallContext};
use ironroot_core::{
    resume_from, InstallOutcome, Orchestrator, Pivot, RunReport, StageStatus,
    SystemHealthGate, SystemPivotEnvironment,
};
use ironroot_ledger::ResourceLedger;
use ironroot_stages::{
    check_install_prereqs, format_missing, select_runner, standard_stages, Criticality, Stage,
    StageError,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOG_FILE: &str = "install.log";

pub struct InstallArgs<'a> {
    pub config: Option<&'a Path>,
    pub resume_context: Option<&'a Path>,
    pub no_pivot: bool,
    pub dry_run: bool,
    pub unattended: bool,
    pub json: bool,
    pub verbose: bool,
    pub trace: bool,
}

impl InstallArgs<'_> {
    /// Flags the relocated child needs to behave like this process.
    fn child_args(&self) -> Vec<String> {
        [
            (self.unattended, "--unattended"),
            (self.json, "--json"),
            (self.verbose, "--verbose"),
            (self.trace, "--trace"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, flag)| flag.to_owned())
        .collect()
    }
}

/// Shows a spinner while the wrapped stage runs.
struct ProgressStage {
    inner: Box<dyn Stage>,
}

impl Stage for ProgressStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn criticality(&self) -> Criticality {
        self.inner.criticality()
    }

    fn required_keys(&self) -> &'static [&'static str] {
        self.inner.required_keys()
    }

    fn precondition(&self, ctx: &InstallContext) -> Result<(), StageError> {
        self.inner.precondition(ctx)
    }

    fn health_check(&self) -> Option<&str> {
        self.inner.health_check()
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let name = self.inner.name();
        let pb = spinner(&format!("{name}..."));
        let result = self.inner.run(ctx, ledger);
        match (&result, self.inner.criticality()) {
            (Ok(()), _) => spin_ok(&pb, name),
            (Err(e), Criticality::Recoverable) => spin_warn(&pb, &format!("{name}: {e}")),
            (Err(e), Criticality::Fatal) => spin_fail(&pb, &format!("{name}: {e}")),
        }
        result
    }
}

/// Build the install context, either from the pivot snapshot handed to a
/// relocated child or from a validated configuration.
fn load_context(args: &InstallArgs<'_>) -> Result<InstallContext, Failure> {
    if let Some(snapshot) = args.resume_context {
        return resume_from(snapshot).map_err(|e| {
            Failure::new(
                EXIT_INSTALL_FAILED,
                format!("cannot resume from {}: {e}", snapshot.display()),
            )
        });
    }

    let config = obtain_config(args.config, args.unattended, EXIT_PRECONDITION)?;
    let report = validate_config(&config);
    if !report.is_ok() {
        let issues: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
        return Err(Failure::new(
            EXIT_PRECONDITION,
            format!("invalid configuration:\n  - {}", issues.join("\n  - ")),
        ));
    }
    let mut ctx = config.to_context();
    let work_dir = allocate_work_dir()?;
    ctx.set(keys::LOG_PATH, work_dir.join(LOG_FILE).display().to_string());
    ctx.set(keys::WORK_DIR, work_dir.display().to_string());
    Ok(ctx)
}

fn allocate_work_dir() -> Result<PathBuf, Failure> {
    tempfile::Builder::new()
        .prefix("ironroot-")
        .tempdir()
        .map(tempfile::TempDir::keep)
        .map_err(|e| Failure::new(EXIT_INSTALL_FAILED, format!("cannot create work directory: {e}")))
}

fn check_host(ctx: &InstallContext, dry_run: bool) -> Result<(), Failure> {
    if dry_run {
        return Ok(());
    }
    if !is_root() {
        return Err(Failure::new(
            EXIT_NOT_ROOT,
            "installing requires root; rerun with sudo or use --dry-run",
        ));
    }
    if std::env::var("IRONROOT_SKIP_PREREQS").as_deref() == Ok("1") {
        debug!("prerequisite check skipped by IRONROOT_SKIP_PREREQS");
        return Ok(());
    }
    let mode = ctx
        .parse::<EncryptionMode>(keys::ENCRYPTION_MODE)
        .unwrap_or(EncryptionMode::Luks2);
    let missing = check_install_prereqs(mode);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Failure::new(EXIT_PRECONDITION, format_missing(&missing)))
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<(), Failure> {
    if let InstallOutcome::HandedOff { exit_code } = report.outcome {
        // The relocated installer prints its own report.
        debug!("relocated installer exited with {exit_code}");
        return Ok(());
    }
    if json {
        println!("{}", json_pretty(report)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    for stage in &report.stages {
        let status = match &stage.status {
            StageStatus::Passed => Style::new().green().apply_to("passed".to_owned()),
            StageStatus::Degraded(e) => Style::new().yellow().apply_to(format!("degraded: {e}")),
            StageStatus::Failed(e) => Style::new().red().apply_to(format!("failed: {e}")),
        };
        println!("{:<12} {status}", stage.name);
    }
    for warning in &report.warnings {
        println!("{} {warning}", dim.apply_to("warning:"));
    }
    if !report.recovered.is_empty() {
        println!(
            "{} {} resources from an interrupted run",
            dim.apply_to("recovered:"),
            report.recovered.attempted()
        );
    }
    println!("install {}", colorize_outcome(&report.outcome));
    Ok(())
}

pub fn run(args: &InstallArgs<'_>) -> Result<u8, Failure> {
    let ctx = load_context(args)?;
    if let Err(e) = logging::init(
        args.verbose,
        args.trace,
        ctx.get(keys::LOG_PATH).map(Path::new),
    ) {
        eprintln!("warning: {e}");
    }
    if let Some(log) = ctx.get(keys::LOG_PATH) {
        info!("install log: {log}");
    }
    check_host(&ctx, args.dry_run)?;

    let runner = select_runner(args.dry_run);
    let show_progress = !args.json && is_interactive();
    let mut stages = standard_stages(&runner);
    if show_progress {
        stages = stages
            .into_iter()
            .map(|inner| Box::new(ProgressStage { inner }) as Box<dyn Stage>)
            .collect();
    }
    let gate = SystemHealthGate::new(runner.clone()).dry_run(args.dry_run);

    let mut orchestrator =
        Orchestrator::new(stages, Box::new(gate), runner.clone()).dry_run(args.dry_run);
    if !args.unattended && is_interactive() {
        orchestrator = orchestrator.with_operator(Box::new(DialoguerOperator));
    }
    if args.no_pivot || args.dry_run {
        debug!("environment pivot disabled for this run");
    } else {
        let env = SystemPivotEnvironment::new(runner);
        orchestrator =
            orchestrator.with_pivot(Pivot::new(Box::new(env)).with_child_args(args.child_args()));
    }

    match orchestrator.run(ctx) {
        Ok(report) => {
            print_report(&report, args.json)?;
            Ok(u8::try_from(report.exit_code()).unwrap_or(EXIT_INSTALL_FAILED))
        }
        Err(e) if e.is_precondition() => Err(Failure::new(EXIT_PRECONDITION, e.to_string())),
        Err(e) => {
            warn!("orchestrator error: {e}");
            Err(Failure::new(EXIT_INSTALL_FAILED, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>() -> InstallArgs<'a> {
        InstallArgs {
            config: None,
            resume_context: None,
            no_pivot: false,
            dry_run: false,
            unattended: false,
            json: false,
            verbose: false,
            trace: false,
        }
    }

    #[test]
    fn child_args_forward_only_set_flags() {
        let mut a = args();
        assert!(a.child_args().is_empty());
        a.unattended = true;
        a.trace = true;
        assert_eq!(a.child_args(), vec!["--unattended", "--trace"]);
    }

    #[test]
    fn dry_run_skips_host_checks() {
        assert!(check_host(&InstallContext::new(), true).is_ok());
    }

    #[test]
    fn unreadable_snapshot_fails_the_install() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("context.json");
        let mut a = args();
        a.resume_context = Some(&snapshot);
        let err = load_context(&a).unwrap_err();
        assert_eq!(err.code, EXIT_INSTALL_FAILED);
    }

    #[test]
    fn invalid_config_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install.toml");
        std::fs::write(&path, "config_version = 1\n[disks]\ndevices = []\n").unwrap();
        let mut a = args();
        a.config = Some(&path);
        let err = load_context(&a).unwrap_err();
        assert_eq!(err.code, EXIT_PRECONDITION);
        assert!(err.message.contains("disks.devices"));
    }
}
