//! Resource tracking and teardown for ironroot.
//!
//! This crate provides the `ResourceLedger`, the ordered record of every system
//! resource an install acquires (block devices, encrypted mappings, pools,
//! mounts) together with its release action, and the `LedgerJournal`, an
//! atomically rewritten on-disk copy of the outstanding entries so a run killed
//! without a chance to clean up can be unwound by the next one.

pub mod journal;
pub mod ledger;

pub use journal::{recover_journal, JournalEntry, LedgerJournal};
pub use ledger::{
    ReleaseAction, ReleaseError, ReleaseFailure, ReleaseReport, ReleasedResource, ResourceHandle,
    ResourceKind, ResourceLedger,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` survives power loss.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("refusing to track a {0} resource with an empty identifier")]
    EmptyIdentifier(ResourceKind),
}
