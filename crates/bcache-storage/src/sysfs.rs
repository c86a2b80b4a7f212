//! Read-only view of bcache state in sysfs
//!
//! Layout used:
//! ```text
//! <sysfs>/block/<disk>/<disk><N>/partition   partition marker
//! <sysfs>/class/block/<dev>/bcache/dev       -> ../../bcacheN   (backing)
//! <sysfs>/class/block/<dev>/bcache/state     runtime state      (backing)
//! <sysfs>/class/block/<dev>/bcache/cache     -> fs/bcache/<set> (attached)
//! <sysfs>/fs/bcache/<set-uuid>/              registered cache set
//! ```
//! Nothing here writes to sysfs.

use crate::device::{
    BCACHE_ATTACH_ALONE, BCACHE_BASIC_STATE_ACTIVE, BCACHE_BASIC_STATE_INACTIVE,
    BCACHE_BNAME_NOT_EXIST, DeviceRecord,
};
use bcache_common::Result;
use bcache_common::config::ProbeConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Enumerate candidate block devices and their partitions.
///
/// Names matching the configured skip prefixes are ignored, as are names
/// with no node under the device root.
pub fn discover_devices(config: &ProbeConfig) -> Result<Vec<PathBuf>> {
    let sys_block = config.sysfs_root.join("block");
    let mut devices = Vec::new();
    if !sys_block.exists() {
        debug!("{} not found, no devices to discover", sys_block.display());
        return Ok(devices);
    }

    for disk in sorted_entries(&sys_block)? {
        let Some(name) = disk.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if config.is_skipped(name) {
            continue;
        }
        push_node(config, name, &mut devices);

        for part in sorted_entries(&disk)? {
            if !part.join("partition").exists() {
                continue;
            }
            if let Some(part_name) = part.file_name().and_then(|n| n.to_str()) {
                push_node(config, part_name, &mut devices);
            }
        }
    }

    Ok(devices)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

fn push_node(config: &ProbeConfig, name: &str, devices: &mut Vec<PathBuf>) {
    let node = config.dev_root.join(name);
    if node.exists() {
        devices.push(node);
    }
}

/// bcache registration state as exposed by the kernel
#[derive(Clone, Debug)]
pub struct SysfsView {
    root: PathBuf,
}

impl SysfsView {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bcache_dir(&self, dev: &str) -> PathBuf {
        self.root.join("class/block").join(dev).join("bcache")
    }

    /// Check whether a cache set is registered
    #[must_use]
    pub fn cache_set_registered(&self, cset: &str) -> bool {
        self.root.join("fs/bcache").join(cset).is_dir()
    }

    /// Check whether a backing device is registered
    #[must_use]
    pub fn backing_registered(&self, dev: &str) -> bool {
        self.bcache_dir(dev).is_dir()
    }

    /// bcache block device name (`bcache0`) of a registered backing device
    #[must_use]
    pub fn bcache_name(&self, dev: &str) -> Option<String> {
        link_basename(&self.bcache_dir(dev).join("dev"))
    }

    /// Runtime state of a registered backing device
    #[must_use]
    pub fn backing_state(&self, dev: &str) -> Option<String> {
        let state = fs::read_to_string(self.bcache_dir(dev).join("state")).ok()?;
        let state = state.trim();
        (!state.is_empty()).then(|| state.to_string())
    }

    /// Cache set a registered backing device is attached to
    #[must_use]
    pub fn attached_set(&self, dev: &str) -> Option<String> {
        link_basename(&self.bcache_dir(dev).join("cache"))
    }

    /// Refine a record's registration fields; `dev` is the kernel name
    pub fn apply(&self, dev: &str, record: &mut DeviceRecord) {
        match record {
            DeviceRecord::Cache(cdev) => {
                cdev.base.state = if self.cache_set_registered(&cdev.base.cset) {
                    BCACHE_BASIC_STATE_ACTIVE
                } else {
                    BCACHE_BASIC_STATE_INACTIVE
                }
                .to_string();
            }
            DeviceRecord::Backing(bdev) => {
                if !self.backing_registered(dev) {
                    return;
                }
                bdev.base.bname = self
                    .bcache_name(dev)
                    .unwrap_or_else(|| BCACHE_BNAME_NOT_EXIST.to_string());
                if let Some(state) = self.backing_state(dev) {
                    bdev.base.state = state;
                }
                bdev.base.attach_uuid = self
                    .attached_set(dev)
                    .unwrap_or_else(|| BCACHE_ATTACH_ALONE.to_string());
            }
        }
    }
}

fn link_basename(link: &Path) -> Option<String> {
    let target = fs::read_link(link).ok()?;
    target.file_name()?.to_str().map(String::from)
}
