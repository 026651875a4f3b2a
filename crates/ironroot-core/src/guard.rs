use ironroot_ledger::{ReleaseReport, ResourceLedger};
use tracing::{debug, warn};

/// Owns the run's ledger and releases it exactly once.
///
/// The orchestrator calls [`release`](Self::release) on both the finalize
/// and the failure path. If the guard is dropped without that call (early
/// return, panic unwinding) the drop performs the release instead.
#[derive(Debug)]
pub struct CleanupGuard {
    ledger: ResourceLedger,
    released: bool,
}

impl CleanupGuard {
    pub fn new(ledger: ResourceLedger) -> Self {
        Self {
            ledger,
            released: false,
        }
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ResourceLedger {
        &mut self.ledger
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Unwind the ledger. Later calls return an empty report.
    pub fn release(&mut self) -> ReleaseReport {
        if self.released {
            debug!("cleanup already ran");
            return ReleaseReport::default();
        }
        self.released = true;
        self.ledger.release_all()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let outstanding = self.ledger.outstanding_count();
        if outstanding > 0 {
            warn!("cleanup guard dropped with {outstanding} outstanding resources, releasing");
        }
        self.release();
    }
}
