use crate::release::track;
use crate::runner::{run_checked, SharedRunner};
use crate::stage::Stage;
use crate::StageError;
use ironroot_config::{keys, InstallContext};
use ironroot_ledger::{ResourceKind, ResourceLedger};
use std::path::Path;
use tracing::info;

/// Pseudo filesystems the target needs for chrooted configuration:
/// (source, fstype, target relative to the alternate root).
const CHROOT_MOUNTS: &[(&str, &str, &str)] = &[
    ("/dev", "bind", "dev"),
    ("proc", "proc", "proc"),
    ("sysfs", "sysfs", "sys"),
];

/// Bootstraps the base system into the pool and prepares it for chroot use.
pub struct SystemStage {
    runner: SharedRunner,
}

impl SystemStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

impl Stage for SystemStage {
    fn name(&self) -> &'static str {
        "system"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[
            keys::POOL_ALTROOT,
            keys::SYSTEM_SUITE,
            keys::SYSTEM_MIRROR,
            keys::SYSTEM_HOSTNAME,
        ]
    }

    fn health_check(&self) -> Option<&str> {
        Some("system")
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let altroot = ctx.require(keys::POOL_ALTROOT)?;
        let suite = ctx.require(keys::SYSTEM_SUITE)?;
        let mirror = ctx.require(keys::SYSTEM_MIRROR)?;
        let hostname = ctx.require(keys::SYSTEM_HOSTNAME)?;
        let root = Path::new(altroot);
        let runner = self.runner.as_ref();

        info!("bootstrapping {suite} into {altroot}");
        run_checked(runner, "debootstrap", &[suite, altroot, mirror])?;
        runner.write_file(&root.join("etc/hostname"), &format!("{hostname}\n"))?;
        runner.write_file(
            &root.join("etc/hosts"),
            &format!("127.0.0.1\tlocalhost\n127.0.1.1\t{hostname}\n"),
        )?;

        for (source, fstype, relative) in CHROOT_MOUNTS {
            let target = root.join(relative);
            let target = target.to_string_lossy();
            if *fstype == "bind" {
                run_checked(runner, "mount", &["--bind", source, &target])?;
            } else {
                run_checked(runner, "mount", &["-t", fstype, source, &target])?;
            }
            track(ledger, &self.runner, ResourceKind::MountPoint, &target)?;
        }
        Ok(())
    }
}
