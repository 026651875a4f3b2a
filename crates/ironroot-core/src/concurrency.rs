use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exclusive lock on the install state directory, held for the whole run.
pub struct InstallLock {
    lock_file: File,
}

impl InstallLock {
    /// Take the lock, or `None` if another process holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Some(Self { lock_file: file }))
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// The process-wide shutdown flag raised by the signal handler.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    Arc::clone(SHUTDOWN_REQUESTED.get_or_init(Arc::default))
}

/// Route SIGINT and SIGTERM to the shutdown flag.
///
/// The first signal only raises the flag; the run unwinds through its
/// cleanup guard after the current step. A second signal exits with 130
/// at once without releasing anything. That is the operator's way out of
/// a hung tool, and the ledger journal lets the next run release whatever
/// was left.
pub fn install_signal_handler() {
    let flag = shutdown_flag();
    let _ = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\nshutdown requested, unwinding after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_records_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("state/install.lock");

        let _lock = InstallLock::try_acquire(&lock_path).unwrap().unwrap();
        let content = std::fs::read_to_string(&lock_path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("install.lock");

        let _lock = InstallLock::try_acquire(&lock_path).unwrap().unwrap();
        let result = InstallLock::try_acquire(&lock_path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn shutdown_flag_is_shared() {
        assert!(Arc::ptr_eq(&shutdown_flag(), &shutdown_flag()));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("install.lock");

        {
            let _lock = InstallLock::try_acquire(&lock_path).unwrap().unwrap();
        }

        let lock2 = InstallLock::try_acquire(&lock_path).unwrap();
        assert!(lock2.is_some());
    }
}
