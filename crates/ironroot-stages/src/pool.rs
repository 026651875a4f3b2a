use crate::release::track;
use crate::runner::{run_checked, SharedRunner};
use crate::stage::Stage;
use crate::StageError;
use ironroot_config::{keys, InstallContext, RaidLevel};
use ironroot_ledger::{ResourceKind, ResourceLedger};
use std::path::Path;
use tracing::info;

/// Creates the storage pool on the prepared vdevs, mounts its root dataset
/// under the alternate root, and mounts the first EFI system partition.
pub struct PoolStage {
    runner: SharedRunner,
}

impl PoolStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

/// Arguments for `zpool create`.
pub fn zpool_create_args<'a>(
    name: &'a str,
    raid: RaidLevel,
    altroot: &'a str,
    vdevs: &'a [String],
) -> Vec<&'a str> {
    let mut args = vec![
        "create",
        "-f",
        "-o",
        "ashift=12",
        "-O",
        "acltype=posixacl",
        "-O",
        "xattr=sa",
        "-O",
        "compression=lz4",
        "-O",
        "mountpoint=none",
        "-R",
        altroot,
        name,
    ];
    if let Some(keyword) = raid.vdev_keyword() {
        args.push(keyword);
    }
    args.extend(vdevs.iter().map(String::as_str));
    args
}

impl Stage for PoolStage {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[keys::POOL_NAME, keys::POOL_RAID, keys::POOL_ALTROOT]
    }

    fn health_check(&self) -> Option<&str> {
        Some("pool")
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let name = ctx.require(keys::POOL_NAME)?.to_owned();
        let raid: RaidLevel = ctx.parse(keys::POOL_RAID)?;
        let altroot = ctx.require(keys::POOL_ALTROOT)?.to_owned();
        let vdevs = ctx.list(keys::VDEVS);
        if vdevs.len() < raid.min_disks() {
            return Err(StageError::Precondition(format!(
                "{raid} pool needs {} vdevs, have {}",
                raid.min_disks(),
                vdevs.len()
            )));
        }
        let runner = self.runner.as_ref();

        info!("creating {raid} pool {name} on {} vdevs", vdevs.len());
        run_checked(runner, "zpool", &zpool_create_args(&name, raid, &altroot, &vdevs))?;
        track(ledger, &self.runner, ResourceKind::Pool, &name)?;

        let root_dataset = format!("{name}/ROOT");
        run_checked(
            runner,
            "zfs",
            &["create", "-o", "mountpoint=/", root_dataset.as_str()],
        )?;
        track(ledger, &self.runner, ResourceKind::MountPoint, &altroot)?;

        if let Some(esp) = ctx.list(keys::ESP_PARTITIONS).first() {
            let efi_dir = Path::new(&altroot).join("boot/efi");
            let efi_dir = efi_dir.to_string_lossy();
            run_checked(runner, "mkfs.vfat", &["-F", "32", "-n", "EFI", esp])?;
            run_checked(runner, "mkdir", &["-p", &efi_dir])?;
            run_checked(runner, "mount", &[esp, &efi_dir])?;
            track(ledger, &self.runner, ResourceKind::MountPoint, &efi_dir)?;
        }
        Ok(())
    }
}
