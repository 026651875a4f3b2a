use crate::journal::{JournalEntry, LedgerJournal};
use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The kinds of system resource an install places under management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    BlockDevice,
    Mapping,
    Pool,
    MountPoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::BlockDevice => write!(f, "block-device"),
            ResourceKind::Mapping => write!(f, "mapping"),
            ResourceKind::Pool => write!(f, "pool"),
            ResourceKind::MountPoint => write!(f, "mount-point"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release command failed: {0}")]
    Failed(String),
    #[error("release I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Undo action for one resource. Must tolerate the resource already being gone.
pub type ReleaseAction = Box<dyn FnMut() -> Result<(), ReleaseError> + Send>;

/// One acquired resource and the action that releases it.
pub struct ResourceHandle {
    kind: ResourceKind,
    identifier: String,
    acquired_at: u64,
    timestamp: String,
    released: bool,
    release: ReleaseAction,
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn acquired_at(&self) -> u64 {
        self.acquired_at
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn journal_entry(&self) -> JournalEntry {
        JournalEntry {
            kind: self.kind,
            identifier: self.identifier.clone(),
            acquired_at: self.acquired_at,
            timestamp: self.timestamp.clone(),
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("acquired_at", &self.acquired_at)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasedResource {
    pub kind: ResourceKind,
    pub identifier: String,
    pub acquired_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseFailure {
    pub kind: ResourceKind,
    pub identifier: String,
    pub acquired_at: u64,
    pub error: String,
}

/// Outcome of one teardown pass, newest resource first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseReport {
    pub released: Vec<ReleasedResource>,
    pub failures: Vec<ReleaseFailure>,
}

impl ReleaseReport {
    /// True when no release action failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when the pass had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.released.len() + self.failures.len()
    }

    pub fn merge(&mut self, other: ReleaseReport) {
        self.released.extend(other.released);
        self.failures.extend(other.failures);
    }
}

/// Append-only record of acquired resources in acquisition order.
///
/// Resources are registered only after they are confirmed present, and
/// [`release_all`](Self::release_all) walks the record newest-first. Because
/// every stage acquires a resource after the ones it depends on, reverse
/// acquisition order is a valid teardown order without the ledger knowing
/// anything about resource kinds.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    handles: Vec<ResourceHandle>,
    next_seq: u64,
    journal: Option<LedgerJournal>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror outstanding entries to `journal` on every change.
    pub fn with_journal(journal: LedgerJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Record a resource that now exists. Returns its sequence number.
    pub fn acquire<F>(
        &mut self,
        kind: ResourceKind,
        identifier: impl Into<String>,
        release: F,
    ) -> Result<u64, LedgerError>
    where
        F: FnMut() -> Result<(), ReleaseError> + Send + 'static,
    {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(LedgerError::EmptyIdentifier(kind));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        info!("acquired {kind} {identifier} (seq={seq})");
        self.handles.push(ResourceHandle {
            kind,
            identifier,
            acquired_at: seq,
            timestamp: chrono::Utc::now().to_rfc3339(),
            released: false,
            release: Box::new(release),
        });
        self.sync_journal();
        Ok(seq)
    }

    /// Release every outstanding resource, newest first.
    ///
    /// A failing release is logged and recorded in the report, never
    /// propagated, and the walk continues with the next older resource.
    /// Handles are marked released before their action runs, so a second
    /// call is a no-op even if the first one was interrupted by a failure.
    pub fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.outstanding_count() == 0 {
            debug!("ledger: nothing to release");
            return report;
        }

        for index in (0..self.handles.len()).rev() {
            let handle = &mut self.handles[index];
            if handle.released {
                continue;
            }
            handle.released = true;
            match (handle.release)() {
                Ok(()) => {
                    info!(
                        "released {} {} (seq={})",
                        handle.kind, handle.identifier, handle.acquired_at
                    );
                    report.released.push(ReleasedResource {
                        kind: handle.kind,
                        identifier: handle.identifier.clone(),
                        acquired_at: handle.acquired_at,
                    });
                }
                Err(e) => {
                    warn!(
                        "failed to release {} {} (seq={}): {e}",
                        handle.kind, handle.identifier, handle.acquired_at
                    );
                    report.failures.push(ReleaseFailure {
                        kind: handle.kind,
                        identifier: handle.identifier.clone(),
                        acquired_at: handle.acquired_at,
                        error: e.to_string(),
                    });
                }
            }
            // A kill mid-teardown must not leave released entries behind.
            self.sync_journal();
        }

        report
    }

    /// Handles not yet released, in acquisition order.
    pub fn outstanding(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter().filter(|h| !h.released)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding().count()
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn sync_journal(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let entries: Vec<JournalEntry> = self
            .outstanding()
            .map(ResourceHandle::journal_entry)
            .collect();
        if let Err(e) = journal.record(&entries) {
            warn!("ledger journal update failed: {e}");
        }
    }
}
