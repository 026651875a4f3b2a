//! Well-known `InstallContext` keys.
//!
//! Keys set from the configuration file are listed first; keys written by
//! stages while they run follow.

pub const DISKS: &str = "disks";
pub const POOL_NAME: &str = "pool.name";
pub const POOL_RAID: &str = "pool.raid";
pub const POOL_ALTROOT: &str = "pool.altroot";
pub const ENCRYPTION_MODE: &str = "encryption.mode";
pub const ENCRYPTION_HEADER: &str = "encryption.header";
pub const ENCRYPTION_HEADER_DIR: &str = "encryption.header_dir";
pub const ENCRYPTION_KEYFILE: &str = "encryption.keyfile";
pub const NETWORK_MODE: &str = "network.mode";
pub const NETWORK_INTERFACE: &str = "network.interface";
pub const NETWORK_ADDRESS: &str = "network.address";
pub const NETWORK_GATEWAY: &str = "network.gateway";
pub const NETWORK_PROBE_HOST: &str = "network.probe_host";
pub const BOOTLOADER: &str = "bootloader";
pub const SYSTEM_SUITE: &str = "system.suite";
pub const SYSTEM_MIRROR: &str = "system.mirror";
pub const SYSTEM_HOSTNAME: &str = "system.hostname";
pub const PIVOT_ENABLED: &str = "pivot.enabled";
pub const PIVOT_SIZE: &str = "pivot.size";
pub const PIVOT_DIR: &str = "pivot.dir";
pub const STATE_DIR: &str = "installer.state_dir";

pub const WORK_DIR: &str = "work_dir";
pub const LOG_PATH: &str = "log_path";

pub const ESP_PARTITIONS: &str = "esp_partitions";
pub const DATA_PARTITIONS: &str = "data_partitions";
pub const MAPPERS: &str = "mappers";
pub const VDEVS: &str = "vdevs";
