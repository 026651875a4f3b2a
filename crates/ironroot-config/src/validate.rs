use crate::config::InstallConfig;
use crate::options::{parse_size, EncryptionMode, HeaderPlacement, NetworkMode};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// A single problem found in an install configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field,
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }
}

/// Check a configuration for internal consistency. Every issue is reported,
/// not just the first one.
pub fn validate_config(config: &InstallConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let devices = &config.disks.devices;

    if devices.is_empty() {
        report.push("disks.devices", "at least one target disk is required");
    }
    let mut seen = BTreeSet::new();
    for device in devices {
        if !device.starts_with("/dev/") {
            report.push(
                "disks.devices",
                format!("'{device}' is not a device path under /dev"),
            );
        }
        if !seen.insert(device.as_str()) {
            report.push("disks.devices", format!("'{device}' is listed twice"));
        }
    }

    let raid = config.pool.raid;
    if !devices.is_empty() && devices.len() < raid.min_disks() {
        report.push(
            "pool.raid",
            format!(
                "{raid} needs at least {} disks, {} configured",
                raid.min_disks(),
                devices.len()
            ),
        );
    }
    if let Err(reason) = check_pool_name(&config.pool.name) {
        report.push("pool.name", reason);
    }
    if !config.pool.altroot.is_absolute() {
        report.push("pool.altroot", "must be an absolute path");
    }

    if config.encryption.mode == EncryptionMode::Luks2 {
        if config.encryption.keyfile.is_none() {
            report.push("encryption.keyfile", "luks2 encryption requires a keyfile");
        }
        if config.encryption.header == HeaderPlacement::Detached
            && config.encryption.header_dir.is_none()
        {
            report.push(
                "encryption.header_dir",
                "detached headers require a header_dir on the header device",
            );
        }
    }

    if config.network.mode == NetworkMode::Static {
        if config.network.address.is_none() {
            report.push("network.address", "static networking requires an address");
        }
        if config.network.interface.is_none() {
            report.push(
                "network.interface",
                "static networking requires an interface",
            );
        }
    }

    if config.system.hostname.is_empty()
        || !config
            .system
            .hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        report.push(
            "system.hostname",
            format!("'{}' is not a valid hostname", config.system.hostname),
        );
    }

    if config.pivot.enabled {
        match parse_size(&config.pivot.size) {
            Ok(0) => report.push("pivot.size", "must be larger than zero"),
            Ok(_) => {}
            Err(reason) => report.push("pivot.size", reason),
        }
        if !config.pivot.dir.is_absolute() {
            report.push("pivot.dir", "must be an absolute path");
        }
    }

    report
}

/// ZFS pool names start with a letter, use `[A-Za-z0-9_.:-]`, and must not
/// collide with vdev keywords.
fn check_pool_name(name: &str) -> Result<(), String> {
    const RESERVED: &[&str] = &["mirror", "raidz", "draid", "spare", "log", "cache"];
    let Some(first) = name.chars().next() else {
        return Err("pool name must not be empty".to_owned());
    };
    if !first.is_ascii_alphabetic() {
        return Err(format!("'{name}' must start with a letter"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')))
    {
        return Err(format!("'{name}' contains invalid character '{bad}'"));
    }
    if RESERVED.iter().any(|r| name.starts_with(r)) {
        return Err(format!("'{name}' begins with a reserved vdev keyword"));
    }
    Ok(())
}
