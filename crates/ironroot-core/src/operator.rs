use tracing::warn;

/// Decides whether the run continues after a recoverable stage failed.
pub trait Operator {
    fn confirm_continue(&self, stage: &str, problem: &str) -> bool;
}

/// Always continues, leaving the failure as a warning in the report.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnattendedOperator;

impl Operator for UnattendedOperator {
    fn confirm_continue(&self, stage: &str, problem: &str) -> bool {
        warn!("{stage} failed ({problem}), continuing unattended");
        true
    }
}
