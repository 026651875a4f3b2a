use super::{json_pretty, obtain_config, Failure, EXIT_SUCCESS, EXIT_VALIDATION_FAILED};
use ironroot_config::{validate_config, InstallConfig, ValidationReport};
use ironroot_core::{Orchestrator, SystemHealthGate};
use ironroot_stages::{select_runner, standard_stages};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ValidateOutput<'a> {
    valid: bool,
    #[serde(flatten)]
    report: &'a ValidationReport,
}

/// Run the configuration checks and every stage precondition without
/// touching a disk.
pub fn check(config: &InstallConfig) -> ValidationReport {
    let mut report = validate_config(config);
    if !report.is_ok() {
        return report;
    }
    let runner = select_runner(true);
    let gate = SystemHealthGate::new(runner.clone()).dry_run(true);
    let mut orchestrator =
        Orchestrator::new(standard_stages(&runner), Box::new(gate), runner).dry_run(true);
    if let Err(e) = orchestrator.validate(&config.to_context()) {
        report.push("stages", e.to_string());
    }
    report
}

pub fn run(config_path: Option<&Path>, unattended: bool, json: bool) -> Result<u8, Failure> {
    let config = obtain_config(config_path, unattended, EXIT_VALIDATION_FAILED)?;
    let report = check(&config);
    let valid = report.is_ok();

    if json {
        println!(
            "{}",
            json_pretty(&ValidateOutput {
                valid,
                report: &report
            })?
        );
    } else if valid {
        println!("configuration is valid");
    } else {
        println!("configuration is invalid:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }

    Ok(if valid {
        EXIT_SUCCESS
    } else {
        EXIT_VALIDATION_FAILED
    })
}
