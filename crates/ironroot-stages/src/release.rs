use crate::runner::{run_checked, CommandRunner, SharedRunner};
use ironroot_ledger::{LedgerError, ReleaseError, ResourceKind, ResourceLedger};
use std::sync::Arc;
use tracing::debug;

/// Register a resource that now exists, releasing it through `runner`.
pub fn track(
    ledger: &mut ResourceLedger,
    runner: &SharedRunner,
    kind: ResourceKind,
    identifier: &str,
) -> Result<u64, LedgerError> {
    let runner = Arc::clone(runner);
    let id = identifier.to_owned();
    ledger.acquire(kind, identifier, move || {
        release_resource(runner.as_ref(), kind, &id)
    })
}

/// Release one resource of `kind`, treating an already absent resource as
/// released.
///
/// Each kind first asks the host whether the resource still exists, so the
/// action is safe to run against a mount that was already unmounted, a
/// mapping someone closed by hand, or a pool that was exported.
pub fn release_resource(
    runner: &dyn CommandRunner,
    kind: ResourceKind,
    identifier: &str,
) -> Result<(), ReleaseError> {
    if !is_present(runner, kind, identifier) {
        debug!("{kind} {identifier} already absent");
        return Ok(());
    }
    match kind {
        ResourceKind::MountPoint => {
            if run_checked(runner, "umount", &[identifier]).is_err() {
                // Busy mounts (a lingering chroot process) detach lazily.
                run_checked(runner, "umount", &["-l", identifier]).map_err(failed)?;
            }
        }
        ResourceKind::Mapping => {
            run_checked(runner, "cryptsetup", &["close", identifier]).map_err(failed)?;
        }
        ResourceKind::Pool => {
            run_checked(runner, "zpool", &["export", identifier]).map_err(failed)?;
        }
        ResourceKind::BlockDevice => {
            run_checked(runner, "blockdev", &["--flushbufs", identifier]).map_err(failed)?;
        }
    }
    Ok(())
}

fn is_present(runner: &dyn CommandRunner, kind: ResourceKind, identifier: &str) -> bool {
    let probe = match kind {
        ResourceKind::MountPoint => runner.run("mountpoint", &["-q", identifier]),
        ResourceKind::Mapping => runner.run("cryptsetup", &["status", identifier]),
        ResourceKind::Pool => runner.run("zpool", &["list", "-H", "-o", "name", identifier]),
        ResourceKind::BlockDevice => runner.run("lsblk", &["-dn", identifier]),
    };
    // If the probe itself cannot run, attempt the release anyway.
    probe.map_or(true, |out| out.success)
}

fn failed(e: crate::StageError) -> ReleaseError {
    ReleaseError::Failed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;

    #[test]
    fn unmounts_present_mount() {
        let runner = RecordingRunner::new();
        release_resource(&runner, ResourceKind::MountPoint, "/mnt/ironroot").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["mountpoint -q /mnt/ironroot", "umount /mnt/ironroot"]
        );
    }

    #[test]
    fn falls_back_to_lazy_unmount() {
        let runner = RecordingRunner::new().with_failure(&["umount", "/mnt/x"], "target is busy");
        release_resource(&runner, ResourceKind::MountPoint, "/mnt/x").unwrap();
        assert_eq!(runner.command_lines().last().unwrap(), "umount -l /mnt/x");
    }

    #[test]
    fn absent_resources_are_skipped() {
        let runner = RecordingRunner::new()
            .with_failure(&["cryptsetup", "status"], "crypt-0 is inactive")
            .with_failure(&["zpool", "list"], "no such pool");
        release_resource(&runner, ResourceKind::Mapping, "crypt-0").unwrap();
        release_resource(&runner, ResourceKind::Pool, "rpool").unwrap();
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn closes_mapping_and_exports_pool() {
        let runner = RecordingRunner::new();
        release_resource(&runner, ResourceKind::Mapping, "crypt-0").unwrap();
        release_resource(&runner, ResourceKind::Pool, "rpool").unwrap();
        release_resource(&runner, ResourceKind::BlockDevice, "/dev/sda").unwrap();
        let lines = runner.command_lines();
        assert!(lines.contains(&"cryptsetup close crypt-0".to_owned()));
        assert!(lines.contains(&"zpool export rpool".to_owned()));
        assert!(lines.contains(&"blockdev --flushbufs /dev/sda".to_owned()));
    }

    #[test]
    fn tracked_resource_releases_through_runner() {
        let recording = Arc::new(RecordingRunner::new());
        let runner: SharedRunner = recording.clone();
        let mut ledger = ResourceLedger::new();
        track(&mut ledger, &runner, ResourceKind::Pool, "rpool").unwrap();
        assert!(recording.calls().is_empty());

        let report = ledger.release_all();
        assert!(report.is_clean());
        assert!(recording
            .command_lines()
            .contains(&"zpool export rpool".to_owned()));
    }

    #[test]
    fn failing_release_is_reported() {
        let runner = RecordingRunner::new().with_failure(&["zpool", "export"], "pool is busy");
        let err = release_resource(&runner, ResourceKind::Pool, "rpool").unwrap_err();
        assert!(err.to_string().contains("pool is busy"));
    }
}
