use crate::context::InstallContext;
use crate::keys;
use crate::options::{BootloaderKind, EncryptionMode, HeaderPlacement, NetworkMode, RaidLevel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected {CONFIG_VERSION}")]
    UnsupportedVersion(u32),
}

/// On-disk install configuration, version 1.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallConfig {
    pub config_version: u32,
    pub disks: DisksSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub encryption: EncryptionSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub bootloader: BootloaderSection,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub pivot: PivotSection,
    #[serde(default)]
    pub installer: InstallerSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DisksSection {
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    #[serde(default = "default_pool_name")]
    pub name: String,
    #[serde(default = "default_raid")]
    pub raid: RaidLevel,
    #[serde(default = "default_altroot")]
    pub altroot: PathBuf,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            raid: default_raid(),
            altroot: default_altroot(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSection {
    #[serde(default = "default_encryption_mode")]
    pub mode: EncryptionMode,
    #[serde(default = "default_header")]
    pub header: HeaderPlacement,
    #[serde(default)]
    pub header_dir: Option<PathBuf>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
}

impl Default for EncryptionSection {
    fn default() -> Self {
        Self {
            mode: default_encryption_mode(),
            header: default_header(),
            header_dir: None,
            keyfile: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default = "default_network_mode")]
    pub mode: NetworkMode,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            mode: default_network_mode(),
            interface: None,
            address: None,
            gateway: None,
            probe_host: default_probe_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BootloaderSection {
    #[serde(default = "default_bootloader")]
    pub kind: BootloaderKind,
}

impl Default for BootloaderSection {
    fn default() -> Self {
        Self {
            kind: default_bootloader(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemSection {
    #[serde(default = "default_suite")]
    pub suite: String,
    #[serde(default = "default_mirror")]
    pub mirror: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            suite: default_suite(),
            mirror: default_mirror(),
            hostname: default_hostname(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PivotSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pivot_size")]
    pub size: String,
    #[serde(default = "default_pivot_dir")]
    pub dir: PathBuf,
}

impl Default for PivotSection {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_pivot_size(),
            dir: default_pivot_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallerSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for InstallerSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_pool_name() -> String {
    "rpool".to_owned()
}

fn default_raid() -> RaidLevel {
    RaidLevel::Mirror
}

fn default_altroot() -> PathBuf {
    PathBuf::from("/mnt/ironroot")
}

fn default_encryption_mode() -> EncryptionMode {
    EncryptionMode::Luks2
}

fn default_header() -> HeaderPlacement {
    HeaderPlacement::Inline
}

fn default_network_mode() -> NetworkMode {
    NetworkMode::Dhcp
}

fn default_probe_host() -> String {
    "deb.debian.org".to_owned()
}

fn default_bootloader() -> BootloaderKind {
    BootloaderKind::Grub
}

fn default_suite() -> String {
    "bookworm".to_owned()
}

fn default_mirror() -> String {
    "http://deb.debian.org/debian".to_owned()
}

fn default_hostname() -> String {
    "server".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_pivot_size() -> String {
    "1G".to_owned()
}

fn default_pivot_dir() -> PathBuf {
    PathBuf::from("/run/ironroot/pivot")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/run/ironroot")
}

impl InstallConfig {
    /// Flatten the configuration into the string keys every stage reads.
    pub fn to_context(&self) -> InstallContext {
        let mut ctx = InstallContext::new();
        ctx.set_list(keys::DISKS, &self.disks.devices);
        ctx.set(keys::POOL_NAME, &self.pool.name);
        ctx.set(keys::POOL_RAID, self.pool.raid.as_str());
        ctx.set(keys::POOL_ALTROOT, self.pool.altroot.to_string_lossy());
        ctx.set(keys::ENCRYPTION_MODE, self.encryption.mode.as_str());
        ctx.set(keys::ENCRYPTION_HEADER, self.encryption.header.as_str());
        if let Some(dir) = &self.encryption.header_dir {
            ctx.set(keys::ENCRYPTION_HEADER_DIR, dir.to_string_lossy());
        }
        if let Some(keyfile) = &self.encryption.keyfile {
            ctx.set(keys::ENCRYPTION_KEYFILE, keyfile.to_string_lossy());
        }
        ctx.set(keys::NETWORK_MODE, self.network.mode.as_str());
        for (key, value) in [
            (keys::NETWORK_INTERFACE, &self.network.interface),
            (keys::NETWORK_ADDRESS, &self.network.address),
            (keys::NETWORK_GATEWAY, &self.network.gateway),
        ] {
            if let Some(value) = value {
                ctx.set(key, value);
            }
        }
        ctx.set(keys::NETWORK_PROBE_HOST, &self.network.probe_host);
        ctx.set(keys::BOOTLOADER, self.bootloader.kind.as_str());
        ctx.set(keys::SYSTEM_SUITE, &self.system.suite);
        ctx.set(keys::SYSTEM_MIRROR, &self.system.mirror);
        ctx.set(keys::SYSTEM_HOSTNAME, &self.system.hostname);
        ctx.set(
            keys::PIVOT_ENABLED,
            if self.pivot.enabled { "true" } else { "false" },
        );
        ctx.set(keys::PIVOT_SIZE, &self.pivot.size);
        ctx.set(keys::PIVOT_DIR, self.pivot.dir.to_string_lossy());
        ctx.set(keys::STATE_DIR, self.installer.state_dir.to_string_lossy());
        ctx
    }
}

pub fn parse_config_str(input: &str) -> Result<InstallConfig, ConfigError> {
    let config: InstallConfig = toml::from_str(input)?;
    if config.config_version != CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(config.config_version));
    }
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<InstallConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
