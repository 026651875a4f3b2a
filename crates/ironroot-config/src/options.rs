//! Typed install options.
//!
//! Every option round-trips through its string form: the configuration file
//! deserializes into these enums, the `InstallContext` stores them as strings,
//! and stages parse them back with `FromStr`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} '{other}', expected one of: {}",
                        stringify!($name),
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

string_enum!(
    /// Redundancy layout of the storage pool.
    RaidLevel {
        Stripe => "stripe",
        Mirror => "mirror",
        Raidz1 => "raidz1",
        Raidz2 => "raidz2",
        Raidz3 => "raidz3",
    }
);

string_enum!(
    /// Whether data partitions are wrapped in LUKS before pooling.
    EncryptionMode {
        Luks2 => "luks2",
        None => "none",
    }
);

string_enum!(
    /// Where LUKS headers live: on the payload device or on a separate device.
    HeaderPlacement {
        Inline => "inline",
        Detached => "detached",
    }
);

string_enum!(
    NetworkMode {
        Dhcp => "dhcp",
        Static => "static",
        None => "none",
    }
);

string_enum!(
    BootloaderKind {
        Grub => "grub",
        SystemdBoot => "systemd-boot",
    }
);

impl RaidLevel {
    /// Smallest number of member devices `zpool create` accepts for this layout.
    pub fn min_disks(self) -> usize {
        match self {
            RaidLevel::Stripe => 1,
            RaidLevel::Mirror | RaidLevel::Raidz1 => 2,
            RaidLevel::Raidz2 => 3,
            RaidLevel::Raidz3 => 4,
        }
    }

    /// The vdev type keyword passed to `zpool create`; a stripe has none.
    pub fn vdev_keyword(self) -> Option<&'static str> {
        match self {
            RaidLevel::Stripe => None,
            other => Some(other.as_str()),
        }
    }
}

/// Parse a human size such as `512M` or `2G` into bytes (binary units).
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("size must not be empty".to_owned());
    }
    let (digits, unit) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size '{input}'"))?;
    let shift = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        _ => return Err(format!("invalid size unit in '{input}'")),
    };
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size '{input}' overflows"))
}
