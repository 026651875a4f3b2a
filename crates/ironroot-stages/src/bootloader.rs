use crate::runner::{run_checked, SharedRunner};
use crate::stage::Stage;
use crate::StageError;
use ironroot_config::{keys, BootloaderKind, InstallContext};
use ironroot_ledger::ResourceLedger;
use tracing::info;

/// Installs the configured EFI bootloader from inside the target.
pub struct BootloaderStage {
    runner: SharedRunner,
}

impl BootloaderStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

/// Commands run with `chroot <altroot>` for each bootloader.
pub fn bootloader_commands(kind: BootloaderKind) -> Vec<Vec<&'static str>> {
    match kind {
        BootloaderKind::Grub => vec![
            vec![
                "grub-install",
                "--target=x86_64-efi",
                "--efi-directory=/boot/efi",
                "--bootloader-id=ironroot",
                "--recheck",
            ],
            vec!["update-grub"],
        ],
        BootloaderKind::SystemdBoot => vec![vec!["bootctl", "install", "--esp-path=/boot/efi"]],
    }
}

impl Stage for BootloaderStage {
    fn name(&self) -> &'static str {
        "bootloader"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[keys::BOOTLOADER, keys::POOL_ALTROOT]
    }

    fn health_check(&self) -> Option<&str> {
        Some("bootloader")
    }

    fn run(&self, ctx: &mut InstallContext, _ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let kind: BootloaderKind = ctx.parse(keys::BOOTLOADER)?;
        let altroot = ctx.require(keys::POOL_ALTROOT)?;
        info!("installing {kind} into {altroot}");
        for command in bootloader_commands(kind) {
            let mut args = vec![altroot];
            args.extend(command);
            run_checked(self.runner.as_ref(), "chroot", &args)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use std::sync::Arc;

    #[test]
    fn grub_installs_then_updates_config() {
        let recording = Arc::new(RecordingRunner::new());
        let stage = BootloaderStage::new(recording.clone());
        let mut ctx = InstallContext::new();
        ctx.set("bootloader", "grub");
        ctx.set("pool.altroot", "/mnt/ironroot");

        stage.run(&mut ctx, &mut ResourceLedger::new()).unwrap();
        let lines = recording.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("chroot /mnt/ironroot grub-install"));
        assert_eq!(lines[1], "chroot /mnt/ironroot update-grub");
    }

    #[test]
    fn systemd_boot_uses_bootctl() {
        let commands = bootloader_commands(BootloaderKind::SystemdBoot);
        assert_eq!(commands, vec![vec!["bootctl", "install", "--esp-path=/boot/efi"]]);
    }

    #[test]
    fn unknown_bootloader_is_a_context_error() {
        let stage = BootloaderStage::new(Arc::new(RecordingRunner::new()));
        let mut ctx = InstallContext::new();
        ctx.set("bootloader", "lilo");
        ctx.set("pool.altroot", "/mnt/ironroot");
        let err = stage.run(&mut ctx, &mut ResourceLedger::new()).unwrap_err();
        assert!(matches!(err, StageError::Context(_)));
    }
}
