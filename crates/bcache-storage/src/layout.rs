//! On-disk superblock layout
//!
//! Disk Layout:
//! ```text
//! +------------------+  Sector 0 (offset 0)
//! |   (unused)       |  4KB - left for partition tables / boot code
//! +------------------+  Sector 8 (offset 4096)
//! |   Superblock     |  2256 bytes used of a 4KB area
//! +------------------+
//! |   Data / Buckets |  Backing data from data_offset, or cache buckets
//! +------------------+
//! ```
//!
//! Superblock record (little-endian):
//! ```text
//!   0  csum          u64   CRC-64 of [8, end of live journal/key entries)
//!   8  offset        u64   sector this superblock was written at
//!  16  version       u64   0/3 cache device, 1/4 backing device
//!  24  magic         [16]
//!  40  uuid          [16]
//!  56  set_uuid      [16]  first 8 bytes double as set_magic
//!  72  label         [32]
//! 104  flags         u64   CacheFlags or BackingFlags, chosen by version
//! 112  seq           u64
//! 120  pad           [u64; 8]
//! 184  nbuckets | data_offset   u64
//! 192  block_size    u16
//! 194  bucket_size   u16   (cache only)
//! 196  nr_in_set     u16   (cache only)
//! 198  nr_this_dev   u16   (cache only)
//! 200  last_mount    u32
//! 204  first_bucket  u16
//! 206  njournal_buckets | keys  u16
//! 208  d             [u64; 256]
//! ```

use bcache_common::checksum::csum_set;
use bcache_common::{Error, FormatError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// bcache superblock magic
pub const BCACHE_MAGIC: [u8; 16] = [
    0xc6, 0x85, 0x73, 0xf6, 0x4e, 0x1a, 0x45, 0xca, 0x82, 0x65, 0xf5, 0x7f, 0x48, 0xba, 0x6d, 0x81,
];

/// Sector size assumed by the on-disk format
pub const SECTOR_SIZE: u64 = 512;

/// Sector holding the superblock
pub const SB_SECTOR: u64 = 8;

/// Byte offset of the superblock
pub const SB_START: u64 = SB_SECTOR * SECTOR_SIZE;

/// Size of the area reserved for the superblock (one 4KB page)
pub const SB_AREA_SIZE: usize = 4096;

/// Label length in bytes
pub const SB_LABEL_SIZE: usize = 32;

/// Capacity of the journal bucket table
pub const SB_JOURNAL_BUCKETS: usize = 256;

/// Default data offset of a backing device, in sectors
pub const BDEV_DATA_START_DEFAULT: u64 = 16;

/// Highest version number ever assigned
pub const BCACHE_SB_MAX_VERSION: u64 = 4;

const MAGIC_OFFSET: usize = 24;
const VERSION_OFFSET: usize = 16;
const COUNT_OFFSET: usize = 206;
const TABLE_OFFSET: usize = 208;

/// Encoded superblock size
pub const SUPERBLOCK_SIZE: usize = TABLE_OFFSET + SB_JOURNAL_BUCKETS * 8;

/// Cache device superblock versions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum CacheVersion {
    /// Version 0
    Original = 0,
    /// Version 3: new UUID format
    WithUuid = 3,
}

/// Backing device superblock versions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum BackingVersion {
    /// Version 1: data starts at [`BDEV_DATA_START_DEFAULT`]
    Original = 1,
    /// Version 4: data offset stored in the superblock
    WithOffset = 4,
}

/// Cache replacement policy (cache devices)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Replacement {
    Lru = 0,
    Fifo = 1,
    Random = 2,
}

impl Replacement {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
            Self::Random => "random",
        }
    }
}

impl TryFrom<u64> for Replacement {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(Self::Lru),
            1 => Ok(Self::Fifo),
            2 => Ok(Self::Random),
            _ => Err(Error::InvalidFlag {
                field: "replacement",
                value,
            }),
        }
    }
}

/// Cache mode (backing devices)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Writethrough = 0,
    Writeback = 1,
    Writearound = 2,
    None = 3,
}

impl CacheMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Writethrough => "writethrough",
            Self::Writeback => "writeback",
            Self::Writearound => "writearound",
            Self::None => "none",
        }
    }
}

impl TryFrom<u64> for CacheMode {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(Self::Writethrough),
            1 => Ok(Self::Writeback),
            2 => Ok(Self::Writearound),
            3 => Ok(Self::None),
            _ => Err(Error::InvalidFlag {
                field: "cache_mode",
                value,
            }),
        }
    }
}

/// Backing device state as recorded in the superblock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum BdevState {
    #[serde(rename = "no cache")]
    None = 0,
    #[serde(rename = "clean")]
    Clean = 1,
    #[serde(rename = "dirty")]
    Dirty = 2,
    #[serde(rename = "inconsistent")]
    Stale = 3,
}

impl BdevState {
    /// Name as reported by the kernel's sysfs `state` attribute
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "no cache",
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Stale => "inconsistent",
        }
    }
}

impl TryFrom<u64> for BdevState {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Clean),
            2 => Ok(Self::Dirty),
            3 => Ok(Self::Stale),
            _ => Err(Error::InvalidFlag {
                field: "bdev_state",
                value,
            }),
        }
    }
}

/// `flags` as interpreted for a cache device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheFlags(pub u64);

crate::bitmask!(CacheFlags, 0, sync_bit, set_sync_bit, 0, 1);
crate::bitmask!(CacheFlags, 0, discard_bit, set_discard_bit, 1, 1);
crate::bitmask!(CacheFlags, 0, replacement_bits, set_replacement_bits, 2, 3);

impl CacheFlags {
    /// Cache set has been synced (ordered writes) at least once
    #[must_use]
    pub const fn sync(&self) -> bool {
        self.sync_bit() != 0
    }

    pub fn set_sync(&mut self, on: bool) {
        let stored = self.set_sync_bit(u64::from(on));
        debug_assert!(stored.is_ok());
    }

    #[must_use]
    pub const fn discard(&self) -> bool {
        self.discard_bit() != 0
    }

    pub fn set_discard(&mut self, on: bool) {
        let stored = self.set_discard_bit(u64::from(on));
        debug_assert!(stored.is_ok());
    }

    /// Replacement policy; values 3..=7 are rejected
    pub fn replacement(&self) -> Result<Replacement> {
        Replacement::try_from(self.replacement_bits())
    }

    pub fn set_replacement(&mut self, policy: Replacement) {
        let stored = self.set_replacement_bits(policy as u64);
        debug_assert!(stored.is_ok());
    }
}

/// `flags` as interpreted for a backing device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackingFlags(pub u64);

crate::bitmask!(BackingFlags, 0, cache_mode_bits, set_cache_mode_bits, 0, 4);
crate::bitmask!(BackingFlags, 0, state_bits, set_state_bits, 61, 2);

impl BackingFlags {
    /// Cache mode; values 4..=15 are rejected
    pub fn cache_mode(&self) -> Result<CacheMode> {
        CacheMode::try_from(self.cache_mode_bits())
    }

    pub fn set_cache_mode(&mut self, mode: CacheMode) {
        let stored = self.set_cache_mode_bits(mode as u64);
        debug_assert!(stored.is_ok());
    }

    pub fn state(&self) -> Result<BdevState> {
        BdevState::try_from(self.state_bits())
    }

    pub fn set_state(&mut self, state: BdevState) {
        let stored = self.set_state_bits(state as u64);
        debug_assert!(stored.is_ok());
    }
}

/// Fixed-capacity table of `u64` entries with a separate logical length.
///
/// All [`SB_JOURNAL_BUCKETS`] slots are kept so that entries past the
/// logical end survive a rewrite unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct BucketTable {
    slots: Box<[u64; SB_JOURNAL_BUCKETS]>,
    len: u16,
}

impl BucketTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Box::new([0; SB_JOURNAL_BUCKETS]),
            len: 0,
        }
    }

    /// Create a table holding `entries`
    pub fn from_slice(entries: &[u64]) -> Result<Self> {
        let len = u16::try_from(entries.len())
            .ok()
            .filter(|&n| usize::from(n) <= SB_JOURNAL_BUCKETS)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{} entries exceed table capacity {SB_JOURNAL_BUCKETS}",
                    entries.len()
                ))
            })?;
        let mut table = Self::new();
        table.slots[..entries.len()].copy_from_slice(entries);
        table.len = len;
        Ok(table)
    }

    fn from_raw(
        slots: Box<[u64; SB_JOURNAL_BUCKETS]>,
        len: u16,
    ) -> std::result::Result<Self, FormatError> {
        if usize::from(len) > SB_JOURNAL_BUCKETS {
            return Err(FormatError::JournalOverflow { count: len });
        }
        Ok(Self { slots, len })
    }

    /// Live entries
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.slots[..usize::from(self.len)]
    }

    /// Every physical slot, including those past the logical end
    #[must_use]
    pub fn slots(&self) -> &[u64; SB_JOURNAL_BUCKETS] {
        &self.slots
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        SB_JOURNAL_BUCKETS
    }

    /// Append an entry
    pub fn push(&mut self, entry: u64) -> Result<()> {
        if self.len() >= SB_JOURNAL_BUCKETS {
            return Err(Error::invalid_argument("bucket table is full"));
        }
        self.slots[self.len()] = entry;
        self.len += 1;
        Ok(())
    }
}

impl Default for BucketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BucketTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Fixed-size, NUL-padded device label
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Label([u8; SB_LABEL_SIZE]);

impl Label {
    /// Build a label, rejecting text longer than [`SB_LABEL_SIZE`] bytes
    pub fn new(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        if bytes.len() > SB_LABEL_SIZE {
            return Err(Error::invalid_argument(format!(
                "label is {} bytes, maximum is {SB_LABEL_SIZE}",
                bytes.len()
            )));
        }
        if bytes.contains(&0) {
            return Err(Error::invalid_argument("label contains a NUL byte"));
        }
        let mut raw = [0u8; SB_LABEL_SIZE];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    #[must_use]
    pub const fn from_bytes(raw: [u8; SB_LABEL_SIZE]) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SB_LABEL_SIZE] {
        &self.0
    }

    /// Bytes up to the first NUL
    #[must_use]
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(SB_LABEL_SIZE);
        &self.0[..end]
    }

    /// Label text, if it is valid UTF-8
    pub fn as_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.trimmed())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", String::from_utf8_lossy(self.trimmed()))
    }
}

/// Cache device payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDevice {
    pub version: CacheVersion,
    pub flags: CacheFlags,
    /// Device size in buckets
    pub bucket_count: u64,
    /// Block size in sectors
    pub block_size: u16,
    /// Bucket size in sectors
    pub bucket_size: u16,
    pub members_in_set: u16,
    pub index_in_set: u16,
    /// Buckets holding the journal
    pub journal_buckets: BucketTable,
}

impl CacheDevice {
    /// Usable cache space in sectors (buckets from `first_bucket` on)
    #[must_use]
    pub fn cache_sectors(&self, first_bucket: u16) -> u64 {
        u64::from(self.bucket_size) * self.bucket_count.saturating_sub(u64::from(first_bucket))
    }

    /// Whole device in sectors
    #[must_use]
    pub fn total_sectors(&self) -> u64 {
        u64::from(self.bucket_size) * self.bucket_count
    }
}

/// Backing device payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackingDevice {
    pub version: BackingVersion,
    pub flags: BackingFlags,
    /// Stored data offset slot (meaningful from version 4 on)
    pub data_offset: u64,
    /// Block size in sectors; shared with the cache layout
    pub block_size: u16,
    /// Cache geometry slots some formatters also fill on backing devices
    pub legacy_geometry: [u16; 3],
    /// Key entries counted by the checksum (`keys` in the kernel's view)
    pub keys: BucketTable,
}

impl BackingDevice {
    /// Sector where cached data begins
    #[must_use]
    pub const fn effective_data_offset(&self) -> u64 {
        match self.version {
            BackingVersion::Original => BDEV_DATA_START_DEFAULT,
            BackingVersion::WithOffset => self.data_offset,
        }
    }
}

/// Version-selected payload: the one place cache and backing layouts diverge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Cache(CacheDevice),
    Backing(BackingDevice),
}

/// Superblock found at [`SB_START`] on cache and backing devices
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    /// Stored checksum; recomputed by [`Superblock::encode`]
    pub checksum: u64,
    /// Sector where this superblock was written
    pub offset: u64,
    pub uuid: [u8; 16],
    pub set_uuid: [u8; 16],
    pub label: Label,
    pub seq: u64,
    /// Reserved words, preserved verbatim
    pub pad: [u64; 8],
    /// Last mount time (Unix epoch seconds)
    pub last_mount: u32,
    pub first_bucket: u16,
    pub role: Role,
}

impl Superblock {
    /// Create a superblock for a fresh cache device
    #[must_use]
    pub fn new_cache(uuid: Uuid, set_uuid: Uuid, device: CacheDevice) -> Self {
        Self::with_role(uuid, set_uuid, Role::Cache(device))
    }

    /// Create a superblock for a fresh backing device
    #[must_use]
    pub fn new_backing(uuid: Uuid, set_uuid: Uuid, device: BackingDevice) -> Self {
        Self::with_role(uuid, set_uuid, Role::Backing(device))
    }

    fn with_role(uuid: Uuid, set_uuid: Uuid, role: Role) -> Self {
        let mut sb = Self {
            checksum: 0,
            offset: SB_SECTOR,
            uuid: *uuid.as_bytes(),
            set_uuid: *set_uuid.as_bytes(),
            label: Label::default(),
            seq: 0,
            pad: [0; 8],
            last_mount: 0,
            first_bucket: 0,
            role,
        };
        sb.update_checksum();
        sb
    }

    /// On-disk version number
    #[must_use]
    pub const fn version(&self) -> u64 {
        match &self.role {
            Role::Cache(c) => c.version as u64,
            Role::Backing(b) => b.version as u64,
        }
    }

    #[must_use]
    pub const fn is_backing_device(&self) -> bool {
        matches!(self.role, Role::Backing(_))
    }

    #[must_use]
    pub const fn cache(&self) -> Option<&CacheDevice> {
        match &self.role {
            Role::Cache(c) => Some(c),
            Role::Backing(_) => None,
        }
    }

    pub fn cache_mut(&mut self) -> Option<&mut CacheDevice> {
        match &mut self.role {
            Role::Cache(c) => Some(c),
            Role::Backing(_) => None,
        }
    }

    #[must_use]
    pub const fn backing(&self) -> Option<&BackingDevice> {
        match &self.role {
            Role::Backing(b) => Some(b),
            Role::Cache(_) => None,
        }
    }

    pub fn backing_mut(&mut self) -> Option<&mut BackingDevice> {
        match &mut self.role {
            Role::Backing(b) => Some(b),
            Role::Cache(_) => None,
        }
    }

    /// Raw `flags` word as stored on disk
    #[must_use]
    pub const fn flags(&self) -> u64 {
        match &self.role {
            Role::Cache(c) => c.flags.0,
            Role::Backing(b) => b.flags.0,
        }
    }

    /// Block size in sectors
    #[must_use]
    pub const fn block_size(&self) -> u16 {
        match &self.role {
            Role::Cache(c) => c.block_size,
            Role::Backing(b) => b.block_size,
        }
    }

    #[must_use]
    pub const fn device_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.uuid)
    }

    #[must_use]
    pub const fn cache_set_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.set_uuid)
    }

    /// `set_magic` view of the set UUID
    #[must_use]
    pub fn set_magic(&self) -> u64 {
        (&self.set_uuid[..8]).get_u64_le()
    }

    fn table(&self) -> &BucketTable {
        match &self.role {
            Role::Cache(c) => &c.journal_buckets,
            Role::Backing(b) => &b.keys,
        }
    }

    /// Length of the checksummed prefix of the encoded record
    #[must_use]
    pub fn active_len(&self) -> usize {
        TABLE_OFFSET + self.table().len() * 8
    }

    /// Parse and validate a superblock.
    ///
    /// Checks run in a fixed order: length, magic, version, table bound,
    /// checksum. A count larger than the table is reported as
    /// [`FormatError::JournalOverflow`] before the checksum is looked at,
    /// since the checksummed length is derived from that count.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, FormatError> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(FormatError::Truncated {
                len: data.len(),
                need: SUPERBLOCK_SIZE,
            });
        }
        let data = &data[..SUPERBLOCK_SIZE];

        if data[MAGIC_OFFSET..MAGIC_OFFSET + 16] != BCACHE_MAGIC {
            return Err(FormatError::BadMagic);
        }

        let version = (&data[VERSION_OFFSET..]).get_u64_le();
        if !matches!(version, 0 | 1 | 3 | 4) {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let count = (&data[COUNT_OFFSET..]).get_u16_le();
        if usize::from(count) > SB_JOURNAL_BUCKETS {
            return Err(FormatError::JournalOverflow { count });
        }

        let stored = (&data[..8]).get_u64_le();
        let computed = csum_set(&data[..TABLE_OFFSET + usize::from(count) * 8]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let mut buf = &data[8..];
        let offset = buf.get_u64_le();
        buf.advance(8 + 16); // version, magic

        let mut uuid = [0u8; 16];
        buf.copy_to_slice(&mut uuid);
        let mut set_uuid = [0u8; 16];
        buf.copy_to_slice(&mut set_uuid);
        let mut label = [0u8; SB_LABEL_SIZE];
        buf.copy_to_slice(&mut label);

        let flags = buf.get_u64_le();
        let seq = buf.get_u64_le();
        let mut pad = [0u64; 8];
        for word in &mut pad {
            *word = buf.get_u64_le();
        }

        let size_or_offset = buf.get_u64_le();
        let block_size = buf.get_u16_le();
        let geometry = [buf.get_u16_le(), buf.get_u16_le(), buf.get_u16_le()];
        let last_mount = buf.get_u32_le();
        let first_bucket = buf.get_u16_le();
        buf.advance(2); // count, already read

        let mut slots = Box::new([0u64; SB_JOURNAL_BUCKETS]);
        for slot in slots.iter_mut() {
            *slot = buf.get_u64_le();
        }
        let table = BucketTable::from_raw(slots, count)?;

        let role = match version {
            0 | 3 => Role::Cache(CacheDevice {
                version: if version == 0 {
                    CacheVersion::Original
                } else {
                    CacheVersion::WithUuid
                },
                flags: CacheFlags(flags),
                bucket_count: size_or_offset,
                block_size,
                bucket_size: geometry[0],
                members_in_set: geometry[1],
                index_in_set: geometry[2],
                journal_buckets: table,
            }),
            _ => Role::Backing(BackingDevice {
                version: if version == 1 {
                    BackingVersion::Original
                } else {
                    BackingVersion::WithOffset
                },
                flags: BackingFlags(flags),
                data_offset: size_or_offset,
                block_size,
                legacy_geometry: geometry,
                keys: table,
            }),
        };

        Ok(Self {
            checksum: stored,
            offset,
            uuid,
            set_uuid,
            label: Label::from_bytes(label),
            seq,
            pad,
            last_mount,
            first_bucket,
            role,
        })
    }

    /// Serialize to [`SUPERBLOCK_SIZE`] bytes with a freshly computed checksum
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SUPERBLOCK_SIZE);

        buf.put_u64_le(0); // checksum, patched below
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.version());
        buf.put_slice(&BCACHE_MAGIC);
        buf.put_slice(&self.uuid);
        buf.put_slice(&self.set_uuid);
        buf.put_slice(self.label.as_bytes());
        buf.put_u64_le(self.flags());
        buf.put_u64_le(self.seq);
        for word in self.pad {
            buf.put_u64_le(word);
        }

        match &self.role {
            Role::Cache(c) => {
                buf.put_u64_le(c.bucket_count);
                buf.put_u16_le(c.block_size);
                buf.put_u16_le(c.bucket_size);
                buf.put_u16_le(c.members_in_set);
                buf.put_u16_le(c.index_in_set);
            }
            Role::Backing(b) => {
                buf.put_u64_le(b.data_offset);
                buf.put_u16_le(b.block_size);
                for slot in b.legacy_geometry {
                    buf.put_u16_le(slot);
                }
            }
        }

        let table = self.table();
        buf.put_u32_le(self.last_mount);
        buf.put_u16_le(self.first_bucket);
        buf.put_u16_le(table.len);
        for slot in table.slots().iter() {
            buf.put_u64_le(*slot);
        }
        debug_assert_eq!(buf.len(), SUPERBLOCK_SIZE);

        let checksum = csum_set(&buf[..self.active_len()]);
        buf[..8].copy_from_slice(&checksum.to_le_bytes());
        buf.freeze()
    }

    /// Recompute the stored checksum after modifying fields
    pub fn update_checksum(&mut self) {
        self.checksum = (&self.encode()[..8]).get_u64_le();
    }
}
