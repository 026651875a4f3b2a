//! Install stages and their system collaborators for ironroot.
//!
//! This crate implements the work the orchestrator sequences: the `Stage`
//! trait with its criticality, the `CommandRunner` seam through which every
//! external tool is invoked (system, dry-run, and recording runners), the six
//! standard stages (disk, encryption, pool, system, bootloader, network),
//! kind-specific resource release, network reachability, prerequisite tool
//! checks, and a configurable mock stage for tests.

pub mod bootloader;
pub mod disk;
pub mod encryption;
pub mod mock;
pub mod network;
pub mod pool;
pub mod prereq;
pub mod release;
pub mod runner;
pub mod stage;
pub mod system;

pub use mock::{MockFailure, MockStage, ReleaseLog};
pub use network::ensure_reachable;
pub use prereq::{check_install_prereqs, format_missing, MissingPrereq};
pub use release::{release_resource, track};
pub use runner::{
    run_checked, select_runner, CommandOutput, CommandRunner, DryRunRunner, RecordingRunner,
    SharedRunner, SystemRunner,
};
pub use stage::{standard_stages, Criticality, Stage};

use ironroot_config::ContextError;
use ironroot_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("{program} failed ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("network unreachable: {0}")]
    Unreachable(String),
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_names_program_and_diagnostic() {
        let e = StageError::ToolFailed {
            program: "zpool".to_owned(),
            status: "exit status: 1".to_owned(),
            stderr: "no such pool".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("zpool"));
        assert!(msg.contains("no such pool"));
    }

    #[test]
    fn missing_key_converts_from_context_error() {
        let e: StageError = ContextError::MissingKey("pool.name".to_owned()).into();
        assert!(e.to_string().contains("pool.name"));
    }
}
