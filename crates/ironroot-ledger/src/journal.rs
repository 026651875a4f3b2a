use crate::ledger::{ReleaseError, ReleaseFailure, ReleaseReport, ReleasedResource, ResourceKind};
use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const JOURNAL_FILE: &str = "ledger.json";

/// A resource that was outstanding when the journal was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub kind: ResourceKind,
    pub identifier: String,
    pub acquired_at: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    updated_at: String,
    entries: Vec<JournalEntry>,
}

/// On-disk mirror of the ledger's outstanding resources.
///
/// The ledger rewrites the journal after every acquire and release. A clean
/// run ends with the file removed; a file left behind means the previous run
/// died before teardown and its entries still need releasing.
#[derive(Debug, Clone)]
pub struct LedgerJournal {
    path: PathBuf,
}

impl LedgerJournal {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(JOURNAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the journal with `entries`; an empty list removes the file.
    pub fn record(&self, entries: &[JournalEntry]) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return self.clear();
        }
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let file = JournalFile {
            updated_at: chrono::Utc::now().to_rfc3339(),
            entries: entries.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| LedgerError::Io(e.error))?;
        crate::fsync_dir(dir)?;
        debug!("ledger journal: {} outstanding", entries.len());
        Ok(())
    }

    /// Entries left by the last writer, in acquisition order. A corrupt
    /// journal is removed and treated as empty.
    pub fn load(&self) -> Result<Vec<JournalEntry>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("unreadable ledger journal {}: {e}", self.path.display());
                let _ = fs::remove_file(&self.path);
                return Ok(Vec::new());
            }
        };
        match serde_json::from_str::<JournalFile>(&content) {
            Ok(file) => {
                let mut entries = file.entries;
                entries.sort_by_key(|e| e.acquired_at);
                Ok(entries)
            }
            Err(e) => {
                warn!("corrupt ledger journal {}: {e}", self.path.display());
                let _ = fs::remove_file(&self.path);
                Ok(Vec::new())
            }
        }
    }

    pub fn clear(&self) -> Result<(), LedgerError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!("ledger journal cleared");
        }
        Ok(())
    }
}

/// Release resources a previous run left in its journal, newest first.
///
/// `release` is the kind-specific undo for one entry. Failures are logged and
/// reported like in [`ResourceLedger::release_all`](crate::ResourceLedger::release_all);
/// the journal is cleared afterwards either way, since a retry on the next
/// start would hit the same failure.
pub fn recover_journal<F>(journal: &LedgerJournal, mut release: F) -> Result<ReleaseReport, LedgerError>
where
    F: FnMut(&JournalEntry) -> Result<(), ReleaseError>,
{
    let entries = journal.load()?;
    let mut report = ReleaseReport::default();
    if entries.is_empty() {
        return Ok(report);
    }
    info!(
        "ledger recovery: {} resources left by an interrupted run",
        entries.len()
    );
    for entry in entries.iter().rev() {
        match release(entry) {
            Ok(()) => {
                info!("ledger recovery: released {} {}", entry.kind, entry.identifier);
                report.released.push(ReleasedResource {
                    kind: entry.kind,
                    identifier: entry.identifier.clone(),
                    acquired_at: entry.acquired_at,
                });
            }
            Err(e) => {
                warn!(
                    "ledger recovery: failed to release {} {}: {e}",
                    entry.kind, entry.identifier
                );
                report.failures.push(ReleaseFailure {
                    kind: entry.kind,
                    identifier: entry.identifier.clone(),
                    acquired_at: entry.acquired_at,
                    error: e.to_string(),
                });
            }
        }
    }
    journal.clear()?;
    Ok(report)
}
