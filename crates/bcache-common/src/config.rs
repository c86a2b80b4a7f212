//! Configuration types for bcache tooling
//!
//! Every field has a default, so an empty or partial TOML file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device probing configuration
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.probe.dev_root.as_os_str().is_empty() {
            return Err(Error::Configuration("probe.dev_root is empty".into()));
        }
        if self.probe.sysfs_root.as_os_str().is_empty() {
            return Err(Error::Configuration("probe.sysfs_root is empty".into()));
        }
        if self.probe.identify_timeout_ms == 0 {
            return Err(Error::Configuration(
                "probe.identify_timeout_ms must be positive".into(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Configuration("logging.level is empty".into()));
        }
        Ok(())
    }
}

/// Device probing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Directory holding device nodes
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,
    /// Mount point of sysfs
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Issue ATA/NVMe identify commands to fill model and serial
    #[serde(default = "default_true")]
    pub identify: bool,
    /// Read superblocks with O_DIRECT (bypasses the page cache)
    #[serde(default = "default_true")]
    pub direct_io: bool,
    /// Timeout for a single ATA/NVMe identify command, in milliseconds
    #[serde(default = "default_identify_timeout_ms")]
    pub identify_timeout_ms: u32,
    /// Device name prefixes skipped during discovery
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dev_root: default_dev_root(),
            sysfs_root: default_sysfs_root(),
            identify: true,
            direct_io: true,
            identify_timeout_ms: default_identify_timeout_ms(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}

impl ProbeConfig {
    /// Check whether a block device name should be skipped during discovery
    #[must_use]
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

const fn default_true() -> bool {
    true
}

const fn default_identify_timeout_ms() -> u32 {
    15_000
}

fn default_skip_prefixes() -> Vec<String> {
    // bcache* nodes are the cached devices bcache exposes, never members
    ["loop", "ram", "zram", "sr", "fd", "bcache"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_log_level() -> String {
    "warn".to_string()
}
