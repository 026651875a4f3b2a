use crate::release::track;
use crate::runner::{run_checked, SharedRunner};
use crate::stage::Stage;
use crate::StageError;
use ironroot_config::{keys, EncryptionMode, HeaderPlacement, InstallContext};
use ironroot_ledger::{ResourceKind, ResourceLedger};
use std::path::Path;
use tracing::info;

/// Wraps each data partition in LUKS2 and opens it, or passes partitions
/// through untouched when encryption is disabled.
pub struct EncryptionStage {
    runner: SharedRunner,
}

impl EncryptionStage {
    pub fn new(runner: SharedRunner) -> Self {
        Self { runner }
    }
}

pub fn mapper_name(index: usize) -> String {
    format!("crypt-{index}")
}

impl Stage for EncryptionStage {
    fn name(&self) -> &'static str {
        "encryption"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &[keys::ENCRYPTION_MODE]
    }

    fn precondition(&self, ctx: &InstallContext) -> Result<(), StageError> {
        let mode: EncryptionMode = ctx.parse(keys::ENCRYPTION_MODE)?;
        if mode == EncryptionMode::Luks2 {
            ctx.require(keys::ENCRYPTION_KEYFILE)?;
            let header: HeaderPlacement = ctx.parse(keys::ENCRYPTION_HEADER)?;
            if header == HeaderPlacement::Detached {
                ctx.require(keys::ENCRYPTION_HEADER_DIR)?;
            }
        }
        Ok(())
    }

    fn health_check(&self) -> Option<&str> {
        Some("encryption")
    }

    fn run(&self, ctx: &mut InstallContext, ledger: &mut ResourceLedger) -> Result<(), StageError> {
        let partitions = ctx.list(keys::DATA_PARTITIONS);
        if partitions.is_empty() {
            return Err(StageError::Precondition(
                "no data partitions; disk stage has not run".to_owned(),
            ));
        }

        let mode: EncryptionMode = ctx.parse(keys::ENCRYPTION_MODE)?;
        if mode == EncryptionMode::None {
            info!("encryption disabled, pooling raw partitions");
            ctx.set_list(keys::VDEVS, &partitions);
            ctx.set(keys::MAPPERS, "");
            return Ok(());
        }

        let keyfile = ctx.require(keys::ENCRYPTION_KEYFILE)?.to_owned();
        let header_dir = match ctx.parse::<HeaderPlacement>(keys::ENCRYPTION_HEADER)? {
            HeaderPlacement::Inline => None,
            HeaderPlacement::Detached => Some(ctx.require(keys::ENCRYPTION_HEADER_DIR)?.to_owned()),
        };

        let runner = self.runner.as_ref();
        let mut mappers = Vec::with_capacity(partitions.len());
        let mut vdevs = Vec::with_capacity(partitions.len());
        for (index, partition) in partitions.iter().enumerate() {
            let name = mapper_name(index);
            let header = header_dir
                .as_deref()
                .map(|dir| Path::new(dir).join(format!("{name}.header")));
            let header_str = header.as_ref().map(|p| p.to_string_lossy().into_owned());

            let mut luks_format = vec![
                "luksFormat",
                "--type",
                "luks2",
                "--batch-mode",
                "--key-file",
                keyfile.as_str(),
            ];
            let mut open_args = vec!["open", "--key-file", keyfile.as_str()];
            if let Some(h) = header_str.as_deref() {
                luks_format.extend(["--header", h]);
                open_args.extend(["--header", h]);
            }
            luks_format.push(partition);
            open_args.extend([partition.as_str(), name.as_str()]);

            info!("encrypting {partition} as {name}");
            run_checked(runner, "cryptsetup", &luks_format)?;
            run_checked(runner, "cryptsetup", &open_args)?;
            track(ledger, &self.runner, ResourceKind::Mapping, &name)?;

            vdevs.push(format!("/dev/mapper/{name}"));
            mappers.push(name);
        }

        ctx.set_list(keys::MAPPERS, &mappers);
        ctx.set_list(keys::VDEVS, &vdevs);
        Ok(())
    }
}
