use dialoguer::{Confirm, Input, MultiSelect, Select};
use ironroot_config::{
    BootloaderKind, BootloaderSection, DisksSection, EncryptionMode, EncryptionSection,
    HeaderPlacement, InstallConfig, InstallerSection, NetworkMode, NetworkSection, PivotSection,
    PoolSection, RaidLevel, SystemSection,
};
use ironroot_core::Operator;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::warn;

fn prompt_err(e: dialoguer::Error) -> String {
    format!("prompt failed: {e}")
}

fn input(prompt: &str, default: &str) -> Result<String, String> {
    Input::<String>::new()
        .with_prompt(prompt)
        .default(default.to_owned())
        .interact_text()
        .map_err(prompt_err)
}

fn optional_input(prompt: &str) -> Result<Option<String>, String> {
    let value = Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then_some(value))
}

fn select<T: Copy + PartialEq + Display>(prompt: &str, all: &[T], default: T) -> Result<T, String> {
    let idx = Select::new()
        .with_prompt(prompt)
        .items(all)
        .default(all.iter().position(|v| *v == default).unwrap_or(0))
        .interact()
        .map_err(prompt_err)?;
    Ok(all[idx])
}

/// Split a comma or whitespace separated device list.
fn split_devices(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Whole disks listed under `sys_block`, skipping virtual and optical devices.
fn list_block_devices(sys_block: &Path) -> Vec<String> {
    const SKIP: &[&str] = &["loop", "ram", "zram", "sr", "dm-", "md", "nbd"];
    let Ok(entries) = std::fs::read_dir(sys_block) else {
        return Vec::new();
    };
    let mut devices: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !SKIP.iter().any(|p| name.starts_with(p)))
        .map(|name| format!("/dev/{name}"))
        .collect();
    devices.sort();
    devices
}

fn prompt_devices() -> Result<Vec<String>, String> {
    let found = list_block_devices(Path::new("/sys/block"));
    loop {
        let devices = if found.is_empty() {
            let raw: String = Input::new()
                .with_prompt("Target disks (all data on them is destroyed)")
                .interact_text()
                .map_err(prompt_err)?;
            split_devices(&raw)
        } else {
            MultiSelect::new()
                .with_prompt("Target disks (space to select, all data on them is destroyed)")
                .items(&found)
                .interact()
                .map_err(prompt_err)?
                .into_iter()
                .map(|i| found[i].clone())
                .collect()
        };
        if !devices.is_empty() {
            return Ok(devices);
        }
        eprintln!("at least one disk is required");
    }
}

/// Build an install configuration by asking on the terminal.
pub fn prompt_config() -> Result<InstallConfig, String> {
    let defaults = (
        PoolSection::default(),
        EncryptionSection::default(),
        NetworkSection::default(),
        SystemSection::default(),
    );

    let devices = prompt_devices()?;

    let pool = PoolSection {
        name: input("Pool name", &defaults.0.name)?,
        raid: select("Pool layout", RaidLevel::ALL, defaults.0.raid)?,
        altroot: defaults.0.altroot,
    };

    let mode = select("Encryption", EncryptionMode::ALL, defaults.1.mode)?;
    let mut encryption = EncryptionSection {
        mode,
        ..defaults.1
    };
    if mode == EncryptionMode::Luks2 {
        encryption.keyfile = Some(PathBuf::from(input(
            "LUKS keyfile",
            "/root/ironroot.key",
        )?));
        encryption.header = select("LUKS header placement", HeaderPlacement::ALL, encryption.header)?;
        if encryption.header == HeaderPlacement::Detached {
            encryption.header_dir = Some(PathBuf::from(input(
                "Directory for detached headers",
                "/boot/luks",
            )?));
        }
    }

    let mode = select("Network", NetworkMode::ALL, defaults.2.mode)?;
    let mut network = NetworkSection {
        mode,
        ..defaults.2
    };
    match mode {
        NetworkMode::Static => {
            network.interface = Some(input("Interface", "eth0")?);
            network.address = Some(input("Address (CIDR)", "192.168.1.10/24")?);
            network.gateway = optional_input("Gateway (empty for none)")?;
        }
        NetworkMode::Dhcp => {
            network.interface = optional_input("Interface (empty for all wired)")?;
        }
        NetworkMode::None => {}
    }

    let bootloader = BootloaderSection {
        kind: select("Bootloader", BootloaderKind::ALL, BootloaderKind::Grub)?,
    };
    let system = SystemSection {
        hostname: input("Hostname", &defaults.3.hostname)?,
        ..defaults.3
    };

    Ok(InstallConfig {
        config_version: ironroot_config::config::CONFIG_VERSION,
        disks: DisksSection { devices },
        pool,
        encryption,
        network,
        bootloader,
        system,
        pivot: PivotSection::default(),
        installer: InstallerSection::default(),
    })
}

/// Asks on the terminal whether to continue past a recoverable failure.
pub struct DialoguerOperator;

impl Operator for DialoguerOperator {
    fn confirm_continue(&self, stage: &str, problem: &str) -> bool {
        eprintln!("stage '{stage}' failed: {problem}");
        Confirm::new()
            .with_prompt("Continue the install without it?")
            .default(false)
            .interact()
            .unwrap_or_else(|e| {
                warn!("prompt failed, aborting: {e}");
                false
            })
    }
}
