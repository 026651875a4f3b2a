//! Install orchestration for ironroot.
//!
//! This crate drives the stage sequence from `ironroot-stages` as an explicit
//! state machine: it checks every stage precondition up front, relocates into
//! a memory-backed environment when required, gates risk-bearing stages
//! behind health checks, and funnels success, failure, and cancellation
//! through one `CleanupGuard` so the resource ledger is unwound exactly once.

pub mod concurrency;
pub mod guard;
pub mod health;
pub mod lifecycle;
pub mod operator;
pub mod orchestrator;
pub mod pivot;

pub use concurrency::{install_signal_handler, shutdown_flag, shutdown_requested, InstallLock};
pub use guard::CleanupGuard;
pub use health::{HealthGate, HealthResult, SystemHealthGate};
pub use lifecycle::{validate_transition, Phase};
pub use operator::{Operator, UnattendedOperator};
pub use orchestrator::{InstallOutcome, Orchestrator, RunReport, StageRecord, StageStatus};
pub use pivot::{
    is_relocated, resume_from, Pivot, PivotChild, PivotEnvironment, SystemPivotEnvironment,
    PIVOT_MARKER_ENV, RELOCATED_LOG,
};

use ironroot_config::ContextError;
use ironroot_ledger::LedgerError;
use ironroot_stages::StageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },
    #[error("health check {check} failed: {details}")]
    HealthFailed { check: String, details: String },
    #[error("operator declined to continue after {stage} failed")]
    Declined { stage: String },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("another install is running (lock held on {})", .0.display())]
    InstallRunning(PathBuf),
    #[error("install cancelled by signal")]
    Cancelled,
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("pivot failed: {0}")]
    Pivot(#[from] PivotError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Failures raised before any stage ran and any resource was touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CoreError::Precondition(_) | CoreError::InstallRunning(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum PivotError {
    #[error("invalid pivot size: {0}")]
    InvalidSize(String),
    #[error("not enough memory for pivot: need {needed} bytes, {available} available")]
    InsufficientMemory { needed: u64, available: u64 },
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("failed to mount pivot root {}: {reason}", dir.display())]
    Mount { dir: PathBuf, reason: String },
    #[error("failed to stage installer: {0}")]
    Staging(String),
    #[error("context handoff failed: {0}")]
    Context(#[from] ContextError),
    #[error("failed to start relocated installer: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("relocated installer exited with code {0} before taking over")]
    ChildExited(i32),
    #[error("relocated installer did not acknowledge within {0}s")]
    AckTimeout(u64),
    #[error("cancelled while waiting for relocated installer")]
    Cancelled,
    #[error("pivot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_stage_and_cause() {
        let e = CoreError::Stage {
            stage: "pool".to_owned(),
            source: StageError::Failed("zpool create failed".to_owned()),
        };
        let msg = e.to_string();
        assert!(msg.contains("pool"));
        assert!(msg.contains("zpool create failed"));
    }

    #[test]
    fn precondition_class() {
        assert!(CoreError::Precondition("x".to_owned()).is_precondition());
        assert!(CoreError::InstallRunning(PathBuf::from("/run/ironroot/install.lock")).is_precondition());
        assert!(!CoreError::Cancelled.is_precondition());
        assert!(!CoreError::Pivot(PivotError::ChildExited(1)).is_precondition());
    }
}
