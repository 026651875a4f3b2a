//! Configuration and installation context for ironroot.
//!
//! This crate defines the input layer: TOML install configuration parsing
//! (`InstallConfig`), typed option enums shared by the stages, the string-keyed
//! `InstallContext` threaded through every stage, checksummed context snapshots
//! used for the environment pivot handoff, and configuration validation.

pub mod config;
pub mod context;
pub mod keys;
pub mod options;
pub mod validate;

pub use config::{
    parse_config_file, parse_config_str, BootloaderSection, ConfigError, DisksSection,
    EncryptionSection, InstallConfig, InstallerSection, NetworkSection, PivotSection, PoolSection,
    SystemSection,
};
pub use context::{ContextError, ContextSnapshot, InstallContext};
pub use options::{
    parse_size, BootloaderKind, EncryptionMode, HeaderPlacement, NetworkMode, RaidLevel,
};
pub use validate::{validate_config, ValidationIssue, ValidationReport};
