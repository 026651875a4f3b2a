use ironroot_config::{keys, EncryptionMode, InstallContext, NetworkMode};
use ironroot_stages::network::NETWORK_UNIT_PATH;
use ironroot_stages::SharedRunner;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Verdict of one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "details", rename_all = "lowercase")]
pub enum HealthResult {
    Pass,
    Warn(String),
    Fail(String),
}

impl HealthResult {
    pub fn is_fail(&self) -> bool {
        matches!(self, HealthResult::Fail(_))
    }

    fn severity(&self) -> u8 {
        match self {
            HealthResult::Pass => 0,
            HealthResult::Warn(_) => 1,
            HealthResult::Fail(_) => 2,
        }
    }

    /// The more severe of two results; the first wins a tie.
    #[must_use]
    pub fn worst(self, other: HealthResult) -> HealthResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthResult::Pass => write!(f, "pass"),
            HealthResult::Warn(d) => write!(f, "warn: {d}"),
            HealthResult::Fail(d) => write!(f, "fail: {d}"),
        }
    }
}

/// Read-only verification of system state after a stage.
pub trait HealthGate {
    fn check(&self, name: &str, ctx: &InstallContext) -> HealthResult;
}

const STAGE_CHECKS: &[&str] = &["disk", "encryption", "pool", "system", "bootloader", "network"];

/// Checks the host the install is running on.
pub struct SystemHealthGate {
    runner: SharedRunner,
    mapper_dir: PathBuf,
    dry_run: bool,
}

impl SystemHealthGate {
    pub fn new(runner: SharedRunner) -> Self {
        Self {
            runner,
            mapper_dir: PathBuf::from("/dev/mapper"),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_mapper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mapper_dir = dir.into();
        self
    }

    fn disk(ctx: &InstallContext) -> HealthResult {
        let mut partitions = ctx.list(keys::ESP_PARTITIONS);
        partitions.extend(ctx.list(keys::DATA_PARTITIONS));
        if partitions.is_empty() {
            return HealthResult::Fail("no partitions recorded".to_owned());
        }
        missing_paths(partitions.iter().map(PathBuf::from), "partition")
    }

    fn encryption(&self, ctx: &InstallContext) -> HealthResult {
        match ctx.parse::<EncryptionMode>(keys::ENCRYPTION_MODE) {
            Ok(EncryptionMode::None) => HealthResult::Pass,
            Ok(EncryptionMode::Luks2) => {
                let mappers = ctx.list(keys::MAPPERS);
                if mappers.is_empty() {
                    return HealthResult::Fail("no encrypted mappings recorded".to_owned());
                }
                missing_paths(mappers.iter().map(|m| self.mapper_dir.join(m)), "mapping")
            }
            Err(e) => HealthResult::Fail(e.to_string()),
        }
    }

    fn pool(&self, ctx: &InstallContext) -> HealthResult {
        let Ok(name) = ctx.require(keys::POOL_NAME) else {
            return HealthResult::Fail("pool name not set".to_owned());
        };
        match self.runner.run("zpool", &["status", "-x", name]) {
            Ok(out) if out.success && out.stdout.contains("healthy") => HealthResult::Pass,
            Ok(out) => {
                let detail = if out.stdout.trim().is_empty() {
                    out.stderr
                } else {
                    out.stdout
                };
                HealthResult::Fail(format!("pool {name}: {}", detail.trim()))
            }
            Err(e) => HealthResult::Fail(e.to_string()),
        }
    }

    fn system(ctx: &InstallContext) -> HealthResult {
        match ctx.require(keys::POOL_ALTROOT) {
            Ok(altroot) => missing_paths(
                std::iter::once(Path::new(altroot).join("etc/os-release")),
                "base system file",
            ),
            Err(e) => HealthResult::Fail(e.to_string()),
        }
    }

    fn bootloader(ctx: &InstallContext) -> HealthResult {
        let altroot = match ctx.require(keys::POOL_ALTROOT) {
            Ok(a) => a,
            Err(e) => return HealthResult::Fail(e.to_string()),
        };
        let efi = Path::new(altroot).join("boot/efi/EFI");
        match std::fs::read_dir(&efi) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    HealthResult::Pass
                } else {
                    HealthResult::Fail(format!("no EFI loader under {}", efi.display()))
                }
            }
            Err(e) => HealthResult::Fail(format!("{}: {e}", efi.display())),
        }
    }

    fn network(ctx: &InstallContext) -> HealthResult {
        match ctx.parse::<NetworkMode>(keys::NETWORK_MODE) {
            Ok(NetworkMode::None) => {
                HealthResult::Warn("network left unconfigured".to_owned())
            }
            Ok(_) => match ctx.require(keys::POOL_ALTROOT) {
                Ok(altroot) => missing_paths(
                    std::iter::once(Path::new(altroot).join(NETWORK_UNIT_PATH)),
                    "network unit",
                ),
                Err(e) => HealthResult::Fail(e.to_string()),
            },
            Err(e) => HealthResult::Fail(e.to_string()),
        }
    }

    /// Every stage check, worst result wins. The network stage is
    /// recoverable, so its failure only warns here.
    fn final_check(&self, ctx: &InstallContext) -> HealthResult {
        STAGE_CHECKS
            .iter()
            .map(|name| match (*name, self.check(name, ctx)) {
                ("network", HealthResult::Fail(d)) => HealthResult::Warn(format!("network: {d}")),
                (_, HealthResult::Pass) => HealthResult::Pass,
                (name, HealthResult::Warn(d)) => HealthResult::Warn(format!("{name}: {d}")),
                (name, HealthResult::Fail(d)) => HealthResult::Fail(format!("{name}: {d}")),
            })
            .fold(HealthResult::Pass, HealthResult::worst)
    }
}

fn missing_paths(paths: impl Iterator<Item = PathBuf>, what: &str) -> HealthResult {
    let missing: Vec<String> = paths
        .filter(|p| !p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if missing.is_empty() {
        HealthResult::Pass
    } else {
        HealthResult::Fail(format!("missing {what}: {}", missing.join(", ")))
    }
}

impl HealthGate for SystemHealthGate {
    fn check(&self, name: &str, ctx: &InstallContext) -> HealthResult {
        if name != "final" && !STAGE_CHECKS.contains(&name) {
            return HealthResult::Fail(format!("unknown health check {name}"));
        }
        if self.dry_run {
            return HealthResult::Warn("not verified in dry run".to_owned());
        }
        let result = match name {
            "disk" => Self::disk(ctx),
            "encryption" => self.encryption(ctx),
            "pool" => self.pool(ctx),
            "system" => Self::system(ctx),
            "bootloader" => Self::bootloader(ctx),
            "network" => Self::network(ctx),
            _ => self.final_check(ctx),
        };
        debug!("health {name}: {result}");
        result
    }
}
