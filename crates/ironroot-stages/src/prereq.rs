use ironroot_config::EncryptionMode;
use std::fmt;
use std::process::Command;

/// A missing host tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const UTIL_LINUX: &str = "part of util-linux (usually pre-installed)";

const BASE_TOOLS: &[(&str, &str, &str)] = &[
    ("wipefs", "clearing old signatures", UTIL_LINUX),
    ("sgdisk", "partitioning target disks", "apt install gdisk"),
    ("partprobe", "rereading partition tables", "apt install parted"),
    ("udevadm", "waiting for device nodes", "part of systemd/udev"),
    ("zpool", "creating the root pool", "apt install zfsutils-linux"),
    ("zfs", "creating root datasets", "apt install zfsutils-linux"),
    ("mkfs.vfat", "formatting the EFI partition", "apt install dosfstools"),
    ("mount", "mounting the target", UTIL_LINUX),
    ("umount", "unmounting the target", UTIL_LINUX),
    ("mountpoint", "checking mounts during cleanup", UTIL_LINUX),
    ("blockdev", "flushing disk buffers", UTIL_LINUX),
    ("lsblk", "inspecting block devices", UTIL_LINUX),
    ("debootstrap", "installing the base system", "apt install debootstrap"),
    ("chroot", "configuring the installed system", "part of coreutils"),
];

/// Check every host tool the install sequence needs for `encryption`.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_install_prereqs(encryption: EncryptionMode) -> Vec<MissingPrereq> {
    check_with(encryption, command_exists)
}

fn check_with(encryption: EncryptionMode, exists: impl Fn(&str) -> bool) -> Vec<MissingPrereq> {
    let mut missing: Vec<MissingPrereq> = BASE_TOOLS
        .iter()
        .filter(|(name, _, _)| !exists(name))
        .map(|&(name, purpose, install_hint)| MissingPrereq {
            name,
            purpose,
            install_hint,
        })
        .collect();

    if encryption == EncryptionMode::Luks2 && !exists("cryptsetup") {
        missing.push(MissingPrereq {
            name: "cryptsetup",
            purpose: "LUKS2 encryption of pool members",
            install_hint: "apt install cryptsetup",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nironroot runs these tools to prepare the target disks.");
    msg
}
