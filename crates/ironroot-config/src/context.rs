use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("required context key '{0}' is not set")]
    MissingKey(String),
    #[error("invalid value '{value}' for context key '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("context snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("context I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Named configuration and state values shared by every stage of a run.
///
/// Values are plain strings; list-valued keys are stored comma-joined.
/// The orchestrator hands the context to one stage at a time by `&mut`,
/// so there is never more than one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallContext {
    values: BTreeMap<String, String>,
}

impl InstallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get), but an absent or empty value is an error.
    pub fn require(&self, key: &str) -> Result<&str, ContextError> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ContextError::MissingKey(key.to_owned())),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_list<S: AsRef<str>>(&mut self, key: &str, items: &[S]) {
        let joined = items
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self.set(key, joined);
    }

    /// Parse a required key into a typed option.
    pub fn parse<T>(&self, key: &str) -> Result<T, ContextError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.require(key)?;
        raw.parse().map_err(|e: T::Err| ContextError::InvalidValue {
            key: key.to_owned(),
            value: raw.to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1" | "yes"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// blake3 digest of the canonical JSON form. `BTreeMap` keeps key order stable.
    pub fn checksum(&self) -> Result<String, ContextError> {
        let json = serde_json::to_string(&self.values)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// A checksummed, serialized `InstallContext` handed across a process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub checksum: String,
    pub context: InstallContext,
}

impl ContextSnapshot {
    pub fn capture(ctx: &InstallContext) -> Result<Self, ContextError> {
        Ok(Self {
            checksum: ctx.checksum()?,
            context: ctx.clone(),
        })
    }

    /// Return the context after confirming it matches its recorded checksum.
    pub fn verify(self) -> Result<InstallContext, ContextError> {
        let actual = self.context.checksum()?;
        if actual != self.checksum {
            return Err(ContextError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(self.context)
    }

    /// Atomically write the snapshot: temp file, fsync, rename, fsync dir.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ContextError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ContextError::Io(e.error))?;
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
