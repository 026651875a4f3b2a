use crate::runner::SharedRunner;
use crate::StageError;
use ironroot_config::InstallContext;
use ironroot_ledger::ResourceLedger;
use serde::Serialize;
use std::fmt;

/// How a stage failure affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Failure aborts the run and unwinds every acquired resource.
    Fatal,
    /// Failure is recorded as a warning and the run continues.
    Recoverable,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Fatal => write!(f, "fatal"),
            Criticality::Recoverable => write!(f, "recoverable"),
        }
    }
}

/// One step of the install sequence.
///
/// A stage reads and mutates the context it is handed and registers every
/// resource it creates with the ledger as soon as the resource exists.
pub trait Stage: Send {
    fn name(&self) -> &str;

    fn criticality(&self) -> Criticality {
        Criticality::Fatal
    }

    /// Context keys that must be set before the run starts.
    fn required_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Checked for every stage before the first one runs, so a missing key
    /// fails the install before any resource is touched.
    fn precondition(&self, ctx: &InstallContext) -> Result<(), StageError> {
        for key in self.required_keys() {
            ctx.require(key)?;
        }
        Ok(())
    }

    /// Name of the health check to run after this stage, if any.
    fn health_check(&self) -> Option<&str> {
        None
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError>;
}

/// The install sequence in dependency order.
pub fn standard_stages(runner: &SharedRunner) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(crate::disk::DiskStage::new(runner.clone())),
        Box::new(crate::encryption::EncryptionStage::new(runner.clone())),
        Box::new(crate::pool::PoolStage::new(runner.clone())),
        Box::new(crate::system::SystemStage::new(runner.clone())),
        Box::new(crate::bootloader::BootloaderStage::new(runner.clone())),
        Box::new(crate::network::NetworkStage::new(runner.clone())),
    ]
}
