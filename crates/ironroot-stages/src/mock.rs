use crate::stage::{Criticality, Stage};
use crate::StageError;
use ironroot_config::InstallContext;
use ironroot_ledger::{ResourceKind, ResourceLedger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Where a [`MockStage`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail before acquiring anything.
    BeforeAcquire,
    /// Fail after acquiring the first `n` resources.
    AfterAcquire(usize),
}

/// Shared record of release actions, in the order they ran.
pub type ReleaseLog = Arc<Mutex<Vec<String>>>;

/// Scripted stage for exercising the orchestrator without touching the host.
///
/// Acquired resources release by appending their identifier to the shared
/// release log, so a test can assert teardown order across stages.
pub struct MockStage {
    name: String,
    criticality: Criticality,
    acquires: Vec<(ResourceKind, String)>,
    sets: Vec<(String, String)>,
    failure: Option<MockFailure>,
    health: Option<String>,
    required: &'static [&'static str],
    release_log: ReleaseLog,
    runs: Arc<AtomicUsize>,
}

impl MockStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            criticality: Criticality::Fatal,
            acquires: Vec::new(),
            sets: Vec::new(),
            failure: None,
            health: None,
            required: &[],
            release_log: ReleaseLog::default(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn recoverable(mut self) -> Self {
        self.criticality = Criticality::Recoverable;
        self
    }

    #[must_use]
    pub fn acquires(mut self, kind: ResourceKind, identifier: &str) -> Self {
        self.acquires.push((kind, identifier.to_owned()));
        self
    }

    /// Write `key = value` into the context when the stage succeeds.
    #[must_use]
    pub fn sets(mut self, key: &str, value: &str) -> Self {
        self.sets.push((key.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn fails(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    #[must_use]
    pub fn with_health_check(mut self, name: &str) -> Self {
        self.health = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn requires(mut self, keys: &'static [&'static str]) -> Self {
        self.required = keys;
        self
    }

    #[must_use]
    pub fn with_release_log(mut self, log: &ReleaseLog) -> Self {
        self.release_log = Arc::clone(log);
        self
    }

    /// Counter of how many times `run` was entered.
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }

    fn failure_error(&self) -> StageError {
        StageError::Failed(format!("{} failed", self.name))
    }
}

impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    fn required_keys(&self) -> &'static [&'static str] {
        self.required
    }

    fn health_check(&self) -> Option<&str> {
        self.health.as_deref()
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failure == Some(MockFailure::BeforeAcquire) {
            return Err(self.failure_error());
        }
        for (n, (kind, identifier)) in self.acquires.iter().enumerate() {
            if self.failure == Some(MockFailure::AfterAcquire(n)) {
                return Err(self.failure_error());
            }
            let log = Arc::clone(&self.release_log);
            let id = identifier.clone();
            ledger.acquire(*kind, identifier.as_str(), move || {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(id.clone());
                Ok(())
            })?;
        }
        if let Some(MockFailure::AfterAcquire(_)) = self.failure {
            return Err(self.failure_error());
        }
        for (key, value) in &self.sets {
            ctx.set(key, value.as_str());
        }
        Ok(())
    }
}
