use crate::release::track;
use crate::runner::{run_checked, SharedRunner};
use crate::stage::Stage;
use crate::StageError;
use ironroot_config::{keys, InstallContext};
use ironroot_ledger::{ResourceKind, ResourceLedger};
use tracing::info;

/// Wipes each target disk and lays out an EFI system partition followed by a
/// pool data partition.
pub struct DiskStage {
    runner: SharedRunner,
}

impl DiskStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

/// Device node of partition `number` on `disk`.
///
/// Disks whose name ends in a digit (`nvme0n1`, `mmcblk0`) take a `p`
/// infix, `/dev/disk/by-*` links take `-part`.
pub fn partition_path(disk: &str, number: u32) -> String {
    if disk.starts_with("/dev/disk/by-") {
        format!("{disk}-part{number}")
    } else if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

impl Stage for DiskStage {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[keys::DISKS]
    }

    fn health_check(&self) -> Option<&str> {
        Some("disk")
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let disks = ctx.list(keys::DISKS);
        if disks.is_empty() {
            return Err(StageError::Precondition("no target disks configured".to_owned()));
        }
        let runner = self.runner.as_ref();

        let mut esp = Vec::with_capacity(disks.len());
        let mut data = Vec::with_capacity(disks.len());
        for disk in &disks {
            info!("partitioning {disk}");
            run_checked(runner, "wipefs", &["-a", disk])?;
            run_checked(runner, "sgdisk", &["--zap-all", disk])?;
            run_checked(
                runner,
                "sgdisk",
                &[
                    "-n1:1M:+512M",
                    "-t1:EF00",
                    "-n2:0:0",
                    "-t2:BF00",
                    disk,
                ],
            )?;
            track(ledger, &self.runner, ResourceKind::BlockDevice, disk)?;
            esp.push(partition_path(disk, 1));
            data.push(partition_path(disk, 2));
        }

        let args: Vec<&str> = disks.iter().map(String::as_str).collect();
        run_checked(runner, "partprobe", &args)?;
        run_checked(runner, "udevadm", &["settle"])?;

        ctx.set_list(keys::ESP_PARTITIONS, &esp);
        ctx.set_list(keys::DATA_PARTITIONS, &data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use std::sync::Arc;

    #[test]
    fn partition_naming() {
        assert_eq!(partition_path("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_path("/dev/mmcblk0", 2), "/dev/mmcblk0p2");
        assert_eq!(
            partition_path("/dev/disk/by-id/ata-WDC_1", 2),
            "/dev/disk/by-id/ata-WDC_1-part2"
        );
    }

    #[test]
    fn partitions_every_disk_and_records_partitions() {
        let recording = Arc::new(RecordingRunner::new());
        let stage = DiskStage::new(recording.clone());
        let mut ctx = InstallContext::new();
        ctx.set("disks", "/dev/sda,/dev/nvme0n1");
        let mut ledger = ResourceLedger::new();

        stage.run(&mut ctx, &mut ledger).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.handles()[1].identifier(), "/dev/nvme0n1");
        assert_eq!(ctx.get("esp_partitions"), Some("/dev/sda1,/dev/nvme0n1p1"));
        assert_eq!(ctx.get("data_partitions"), Some("/dev/sda2,/dev/nvme0n1p2"));
        let lines = recording.command_lines();
        assert!(lines.contains(&"wipefs -a /dev/sda".to_owned()));
        assert!(lines.contains(&"partprobe /dev/sda /dev/nvme0n1".to_owned()));
    }

    #[test]
    fn disk_is_not_tracked_when_partitioning_fails() {
        let recording = Arc::new(
            RecordingRunner::new().with_failure(&["sgdisk", "-n1:1M:+512M"], "device busy"),
        );
        let stage = DiskStage::new(recording);
        let mut ctx = InstallContext::new();
        ctx.set("disks", "/dev/sda");
        let mut ledger = ResourceLedger::new();

        let err = stage.run(&mut ctx, &mut ledger).unwrap_err();
        assert!(err.to_string().contains("device busy"));
        assert!(ledger.is_empty());
    }
}
