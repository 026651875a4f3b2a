pub mod install;
pub mod prompt;
pub mod validate;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use ironroot_config::{parse_config_file, InstallConfig};
use ironroot_core::InstallOutcome;
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_INSTALL_FAILED: u8 = 1;
pub const EXIT_VALIDATION_FAILED: u8 = 2;
pub const EXIT_NOT_ROOT: u8 = 3;
pub const EXIT_PRECONDITION: u8 = 4;

/// A command failure with the process exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(EXIT_INSTALL_FAILED, format!("JSON serialization failed: {e}")))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("{} {msg}", Style::new().green().apply_to("✓")));
}

pub fn spin_warn(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("{} {msg}", Style::new().yellow().apply_to("!")));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("{} {msg}", Style::new().red().apply_to("✗")));
}

pub fn colorize_outcome(outcome: &InstallOutcome) -> String {
    match outcome {
        InstallOutcome::Success => Style::new().green().bold().apply_to("success").to_string(),
        InstallOutcome::SuccessWithWarnings => Style::new()
            .yellow()
            .bold()
            .apply_to("success with warnings")
            .to_string(),
        InstallOutcome::HandedOff { exit_code } => Style::new()
            .cyan()
            .apply_to(format!("handed off (exit {exit_code})"))
            .to_string(),
        InstallOutcome::Failed { error } => Style::new()
            .red()
            .bold()
            .apply_to(format!("failed: {error}"))
            .to_string(),
    }
}

pub fn is_root() -> bool {
    #[allow(unsafe_code)]
    unsafe {
        libc::geteuid() == 0
    }
}

pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

/// Load the configuration from `path`, or ask for it when none is given.
///
/// Without a file, unattended runs cannot proceed: there is nobody to ask.
pub fn obtain_config(
    path: Option<&Path>,
    unattended: bool,
    missing_code: u8,
) -> Result<InstallConfig, Failure> {
    match path {
        Some(path) => parse_config_file(path)
            .map_err(|e| Failure::new(missing_code, format!("{}: {e}", path.display()))),
        None if unattended => Err(Failure::new(
            missing_code,
            "--unattended requires --config <FILE>",
        )),
        None if !is_interactive() => Err(Failure::new(
            missing_code,
            "no configuration given and no terminal to prompt on; pass --config <FILE>",
        )),
        None => prompt::prompt_config().map_err(|e| Failure::new(missing_code, e)),
    }
}
