//! Device records and the scan inventory
//!
//! A [`DeviceRecord`] is the presentation view of one probed device: the
//! decoded superblock flattened into strings and counters, plus the
//! registration state read from sysfs and the identity reported by the
//! device. Records live in an [`Inventory`] for one invocation.

use crate::identify::DeviceIdentity;
use crate::layout::{BdevState, CacheMode, Replacement, Role, Superblock};
use serde::Serialize;
use uuid::Uuid;

/// Value not available for this device
pub const BCACHE_NO_SUPPORT: &str = "N/A";
/// Cache set registered with the kernel
pub const BCACHE_BASIC_STATE_ACTIVE: &str = "active";
/// Cache set not registered
pub const BCACHE_BASIC_STATE_INACTIVE: &str = "inactive";
/// Backing device not attached to any cache set
pub const BCACHE_ATTACH_ALONE: &str = "Alone";
/// Backing device has no bcache block device
pub const BCACHE_BNAME_NOT_EXIST: &str = "Non-Exist";

const MAGIC_OK: &str = "ok";

/// Fields shared by cache and backing devices
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dev {
    /// Device node path
    pub name: String,
    pub magic: String,
    /// Sector the superblock claims to live at
    pub first_sector: u64,
    pub csum: u64,
    pub version: u64,
    pub label: String,
    pub uuid: String,
    pub sectors_per_block: u16,
    pub sectors_per_bucket: u16,
    /// Cache set UUID
    pub cset: String,
    pub state: String,
    /// bcache block device name (`bcache0`), backing devices only
    pub bname: String,
    pub attach_uuid: String,
    /// Model/serial reported by the device, if identification worked
    pub identity: Option<DeviceIdentity>,
}

impl Dev {
    fn from_superblock(name: &str, sb: &Superblock) -> Self {
        Self {
            name: name.to_string(),
            magic: MAGIC_OK.to_string(),
            first_sector: sb.offset,
            csum: sb.checksum,
            version: sb.version(),
            label: sb.label.to_string(),
            uuid: sb.device_uuid().to_string(),
            sectors_per_block: sb.block_size(),
            sectors_per_bucket: 0,
            cset: sb.cache_set_uuid().to_string(),
            state: BCACHE_NO_SUPPORT.to_string(),
            bname: BCACHE_NO_SUPPORT.to_string(),
            attach_uuid: BCACHE_NO_SUPPORT.to_string(),
            identity: None,
        }
    }

    /// Model name, or [`BCACHE_NO_SUPPORT`] when identification failed
    #[must_use]
    pub fn model(&self) -> &str {
        self.identity
            .as_ref()
            .map_or(BCACHE_NO_SUPPORT, |id| id.model.as_str())
    }

    #[must_use]
    pub fn serial(&self) -> &str {
        self.identity
            .as_ref()
            .map_or(BCACHE_NO_SUPPORT, |id| id.serial.as_str())
    }
}

/// Backing device record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Bdev {
    #[serde(flatten)]
    pub base: Dev,
    /// Sector where cached data begins
    pub data_offset: u64,
    /// `None` when the flag bits hold an undefined mode
    pub cache_mode: Option<CacheMode>,
    pub cache_state: Option<BdevState>,
}

/// Cache device record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cdev {
    #[serde(flatten)]
    pub base: Dev,
    pub first_bucket: u16,
    pub cache_sectors: u64,
    pub total_sectors: u64,
    /// Cache set has been synced (`CACHE_SYNC`)
    pub ordered: bool,
    pub discard: bool,
    /// Index of this device within its cache set
    pub pos: u16,
    pub members_in_set: u16,
    pub replacement: Option<Replacement>,
}

/// A probed device, cache or backing
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceRecord {
    Backing(Bdev),
    Cache(Cdev),
}

impl DeviceRecord {
    /// Build a record from a decoded superblock.
    ///
    /// Registration fields start from what the superblock alone implies:
    /// cache devices are `inactive`, backing devices take their state from
    /// the flags and count as attached when the set UUID is non-nil.
    #[must_use]
    pub fn from_superblock(name: &str, sb: &Superblock) -> Self {
        let mut base = Dev::from_superblock(name, sb);

        match &sb.role {
            Role::Cache(cache) => {
                base.sectors_per_bucket = cache.bucket_size;
                base.state = BCACHE_BASIC_STATE_INACTIVE.to_string();

                Self::Cache(Cdev {
                    base,
                    first_bucket: sb.first_bucket,
                    cache_sectors: cache.cache_sectors(sb.first_bucket),
                    total_sectors: cache.total_sectors(),
                    ordered: cache.flags.sync(),
                    discard: cache.flags.discard(),
                    pos: cache.index_in_set,
                    members_in_set: cache.members_in_set,
                    replacement: cache.flags.replacement().ok(),
                })
            }
            Role::Backing(backing) => {
                let cache_state = backing.flags.state().ok();
                base.state = cache_state
                    .map_or(BCACHE_NO_SUPPORT, BdevState::as_str)
                    .to_string();
                base.bname = BCACHE_BNAME_NOT_EXIST.to_string();
                base.attach_uuid = if sb.cache_set_uuid().is_nil() {
                    BCACHE_ATTACH_ALONE.to_string()
                } else {
                    base.cset.clone()
                };

                Self::Backing(Bdev {
                    base,
                    data_offset: backing.effective_data_offset(),
                    cache_mode: backing.flags.cache_mode().ok(),
                    cache_state,
                })
            }
        }
    }

    #[must_use]
    pub const fn base(&self) -> &Dev {
        match self {
            Self::Backing(b) => &b.base,
            Self::Cache(c) => &c.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut Dev {
        match self {
            Self::Backing(b) => &mut b.base,
            Self::Cache(c) => &mut c.base,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.base().name
    }

    #[must_use]
    pub const fn is_backing(&self) -> bool {
        matches!(self, Self::Backing(_))
    }
}

/// Devices found during one scan, in discovery order
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Inventory {
    devices: Vec<DeviceRecord>,
}

impl Inventory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DeviceRecord) {
        self.devices.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRecord> {
        self.devices.iter()
    }

    pub fn backing_devices(&self) -> impl Iterator<Item = &Bdev> {
        self.devices.iter().filter_map(|r| match r {
            DeviceRecord::Backing(b) => Some(b),
            DeviceRecord::Cache(_) => None,
        })
    }

    pub fn cache_devices(&self) -> impl Iterator<Item = &Cdev> {
        self.devices.iter().filter_map(|r| match r {
            DeviceRecord::Cache(c) => Some(c),
            DeviceRecord::Backing(_) => None,
        })
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|r| r.name() == name)
    }

    /// First device (cache or backing) belonging to a cache set
    #[must_use]
    pub fn find_by_cset(&self, cset: &Uuid) -> Option<&DeviceRecord> {
        let cset = cset.to_string();
        self.devices.iter().find(|r| r.base().cset == cset)
    }

    /// Name of the cache device serving a cache set
    #[must_use]
    pub fn cset_to_devname(&self, cset: &Uuid) -> Option<&str> {
        let cset = cset.to_string();
        self.cache_devices()
            .find(|c| c.base.cset == cset)
            .map(|c| c.base.name.as_str())
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a DeviceRecord;
    type IntoIter = std::slice::Iter<'a, DeviceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
