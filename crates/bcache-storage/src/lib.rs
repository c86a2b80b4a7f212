//! bcache on-disk metadata and device inventory
//!
//! This crate covers the user-space side of bcache metadata:
//! - Bit-packed flag accessors (`bitmask!`)
//! - Superblock codec for cache and backing devices
//! - Raw device access (O_DIRECT / F_NOCACHE)
//! - ATA / SCSI / NVMe identify over kernel pass-through
//! - Device records, sysfs registration view and inventory scans

pub mod bitfield;
pub mod device;
pub mod identify;
pub mod layout;
pub mod probe;
pub mod raw_io;
pub mod sysfs;

// Re-exports
pub use device::{Bdev, Cdev, Dev, DeviceRecord, Inventory};
pub use identify::{DeviceClass, DeviceIdentity, IdentifyProtocol, Passthrough, SgPassthrough};
pub use layout::{
    BackingDevice, BackingFlags, BackingVersion, BdevState, BucketTable, CacheDevice, CacheFlags,
    CacheMode, CacheVersion, Label, Replacement, Role, SB_START, SUPERBLOCK_SIZE, Superblock,
};
pub use probe::{Prober, ScanReport, SkippedDevice};
pub use raw_io::{AlignedBuffer, RawFile};
pub use sysfs::SysfsView;
