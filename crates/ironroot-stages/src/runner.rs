use crate::StageError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: "exit status: 0".to_owned(),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            status: "exit status: 1".to_owned(),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Every side effect a stage has on the host goes through a runner.
///
/// Runners are shared between stages and the release actions stages
/// register with the ledger, so they must be `Send + Sync`.
pub trait CommandRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Run `program` with `args` to completion. A non-zero exit is not an
    /// error at this level; see [`run_checked`].
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StageError>;

    /// Create or replace a file, creating parent directories as needed.
    fn write_file(&self, path: &Path, contents: &str) -> Result<(), StageError>;
}

pub type SharedRunner = Arc<dyn CommandRunner>;

/// Run a command and turn a non-zero exit into [`StageError::ToolFailed`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput, StageError> {
    let output = runner.run(program, args)?;
    if output.success {
        Ok(output)
    } else {
        Err(StageError::ToolFailed {
            program: program.to_owned(),
            status: output.status,
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

pub fn select_runner(dry_run: bool) -> SharedRunner {
    if dry_run {
        Arc::new(DryRunRunner)
    } else {
        Arc::new(SystemRunner)
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs tools on the host with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn name(&self) -> &'static str {
        "system"
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StageError> {
        debug!("exec: {}", command_line(program, args));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| StageError::Spawn {
                program: program.to_owned(),
                source,
            })?;
        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), StageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

/// Logs what would run and reports success without touching the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StageError> {
        info!("dry-run: {}", command_line(program, args));
        Ok(CommandOutput::ok(""))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), StageError> {
        info!("dry-run: write {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }
}

/// Test double that records invocations and answers from scripted rules.
///
/// Rules match on an argv prefix (`["zpool", "create"]` matches any
/// `zpool create ...`). Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    files: Mutex<Vec<(PathBuf, String)>>,
    rules: Mutex<Vec<(Vec<String>, CommandOutput)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command starting with `prefix` fail with `stderr`.
    #[must_use]
    pub fn with_failure(self, prefix: &[&str], stderr: &str) -> Self {
        self.add_rule(prefix, CommandOutput::failed(stderr));
        self
    }

    /// Make every command starting with `prefix` print `stdout`.
    #[must_use]
    pub fn with_stdout(self, prefix: &[&str], stdout: &str) -> Self {
        self.add_rule(prefix, CommandOutput::ok(stdout));
        self
    }

    fn add_rule(&self, prefix: &[&str], output: CommandOutput) {
        let prefix = prefix.iter().map(|s| (*s).to_owned()).collect();
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((prefix, output));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Recorded invocations rendered as shell-like command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|argv| argv.join(" ")).collect()
    }

    pub fn files(&self) -> Vec<(PathBuf, String)> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StageError> {
        let argv: Vec<String> = std::iter::once(program)
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect();
        let output = self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| argv.starts_with(prefix))
            .map_or_else(|| CommandOutput::ok(""), |(_, out)| out.clone());
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(argv);
        Ok(output)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), StageError> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((path.to_path_buf(), contents.to_owned()));
        Ok(())
    }
}
