//! Device probing and inventory scans
//!
//! A probe opens the device, decodes the superblock, closes the device and
//! only then asks the device to identify itself. Every failure is returned
//! to the caller; [`Prober::scan`] records the failed device and moves on.

use crate::device::{DeviceRecord, Inventory};
use crate::identify::{self, DeviceClass, DeviceIdentity, SgPassthrough};
use crate::layout::{Label, SB_AREA_SIZE, SB_START, Superblock};
use crate::raw_io::{AlignedBuffer, RawFile};
use crate::sysfs::{SysfsView, discover_devices};
use bcache_common::config::ProbeConfig;
use bcache_common::{Error, FormatError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A device left out of the inventory
#[derive(Debug)]
pub struct SkippedDevice {
    pub path: PathBuf,
    pub error: Error,
}

/// Result of scanning a list of devices
#[derive(Debug, Default)]
pub struct ScanReport {
    pub inventory: Inventory,
    pub skipped: Vec<SkippedDevice>,
}

/// Kernel name of a device node (`/dev/sdb1` -> `sdb1`).
///
/// Symlinks such as `/dev/disk/by-id/...` are resolved first so the name
/// matches the sysfs entry of the node they point to.
fn kernel_name(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Reads, identifies and rewrites bcache devices
pub struct Prober {
    config: ProbeConfig,
    sysfs: SysfsView,
}

impl Prober {
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        let sysfs = SysfsView::new(config.sysfs_root.clone());
        Self { config, sysfs }
    }

    #[must_use]
    pub const fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Candidate devices from sysfs
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        discover_devices(&self.config)
    }

    /// Read and decode the superblock of a device.
    ///
    /// A device too small to hold the superblock area is reported as
    /// truncated rather than as a read error.
    pub fn read_superblock(&self, path: &Path) -> Result<Superblock> {
        let mut area = AlignedBuffer::new(SB_AREA_SIZE);
        {
            let file = RawFile::open(path, true, self.config.direct_io)?;
            let size = file.size()?;
            if size < SB_START + SB_AREA_SIZE as u64 {
                return Err(FormatError::Truncated {
                    len: usize::try_from(size.saturating_sub(SB_START)).unwrap_or(0),
                    need: SB_AREA_SIZE,
                }
                .into());
            }
            file.read_at(SB_START, area.as_mut_slice())?;
        }
        Ok(Superblock::decode(area.as_slice())?)
    }

    /// Ask the device for its model and serial number
    pub fn identify_device(&self, path: &Path) -> Result<DeviceIdentity> {
        let file = RawFile::open(path, true, false)?;
        let mut transport =
            SgPassthrough::new(file.file()).with_timeout(self.config.identify_timeout_ms);
        identify::identify(&mut transport, DeviceClass::from_name(&kernel_name(path)))
    }

    /// Probe one device into a record
    pub fn probe(&self, path: &Path) -> Result<DeviceRecord> {
        self.probe_with(path, |p| self.identify_device(p))
    }

    /// Probe one device, identifying it with `identify`.
    ///
    /// Identification runs only after the superblock decoded; its failure
    /// leaves the identity empty instead of failing the probe.
    pub fn probe_with<F>(&self, path: &Path, identify: F) -> Result<DeviceRecord>
    where
        F: FnOnce(&Path) -> Result<DeviceIdentity>,
    {
        let sb = self.read_superblock(path)?;
        let name = kernel_name(path);
        debug!(
            "{}: bcache superblock version {}, uuid {}",
            path.display(),
            sb.version(),
            sb.device_uuid()
        );

        let mut record = DeviceRecord::from_superblock(&path.display().to_string(), &sb);
        self.sysfs.apply(&name, &mut record);

        if self.config.identify {
            match identify(path) {
                Ok(identity) => record.base_mut().identity = Some(identity),
                Err(e) if e.is_identify_failure() => {
                    debug!("{}: device did not identify: {e}", path.display());
                }
                Err(e) => warn!("{}: cannot open for identify: {e}", path.display()),
            }
        }
        Ok(record)
    }

    /// Probe every path, collecting failures instead of stopping
    pub fn scan(&self, paths: &[PathBuf]) -> ScanReport {
        let mut report = ScanReport::default();
        for path in paths {
            match self.probe(path) {
                Ok(record) => report.inventory.push(record),
                Err(error) => {
                    if error.is_format() {
                        debug!("{}: skipped: {error}", path.display());
                    } else {
                        warn!("{}: skipped: {error}", path.display());
                    }
                    report.skipped.push(SkippedDevice {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Write a superblock back to its device.
    ///
    /// The whole 4KB superblock area is read, the record replaced and the
    /// area written back in one request, then synced.
    pub fn write_superblock(&self, path: &Path, sb: &Superblock) -> Result<()> {
        let file = RawFile::open(path, false, self.config.direct_io)?;
        let mut area = AlignedBuffer::new(SB_AREA_SIZE);
        file.read_at(SB_START, area.as_mut_slice())?;

        let encoded = sb.encode();
        area.as_mut_slice()[..encoded.len()].copy_from_slice(&encoded);
        file.write_at(SB_START, area.as_slice())?;
        file.sync()?;

        info!(
            "{}: wrote superblock version {} (uuid {})",
            path.display(),
            sb.version(),
            sb.device_uuid()
        );
        Ok(())
    }

    /// Replace the label of a device and rewrite its superblock
    pub fn set_label(&self, path: &Path, label: &str) -> Result<Superblock> {
        let label = Label::new(label)?;
        let mut sb = self.read_superblock(path)?;
        sb.label = label;
        self.write_superblock(path, &sb)?;
        sb.update_checksum();
        Ok(sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::IdentifyProtocol;
    use crate::layout::{
        BackingDevice, BackingFlags, BackingVersion, BucketTable, CacheDevice, CacheFlags,
        CacheMode, CacheVersion,
    };
    use std::fs;
    use std::os::unix::fs::FileExt;
    use tempfile::TempDir;
    use uuid::Uuid;

    const IMAGE_SIZE: usize = 16 * 1024;

    fn prober(root: &TempDir, identify: bool) -> Prober {
        Prober::new(ProbeConfig {
            dev_root: root.path().join("dev"),
            sysfs_root: root.path().join("sys"),
            identify,
            direct_io: false,
            ..ProbeConfig::default()
        })
    }

    fn cache_sb() -> Superblock {
        let mut flags = CacheFlags::default();
        flags.set_discard(true);
        let mut sb = Superblock::new_cache(
            Uuid::new_v4(),
            Uuid::new_v4(),
            CacheDevice {
                version: CacheVersion::WithUuid,
                flags,
                bucket_count: 4096,
                block_size: 8,
                bucket_size: 1024,
                members_in_set: 1,
                index_in_set: 0,
                journal_buckets: BucketTable::from_slice(&[1, 2, 3]).unwrap(),
            },
        );
        sb.first_bucket = 1;
        sb
    }

    fn backing_sb() -> Superblock {
        let mut flags = BackingFlags::default();
        flags.set_cache_mode(CacheMode::Writearound);
        Superblock::new_backing(
            Uuid::new_v4(),
            Uuid::nil(),
            BackingDevice {
                version: BackingVersion::WithOffset,
                flags,
                data_offset: 8192,
                block_size: 1,
                legacy_geometry: [0; 3],
                keys: BucketTable::new(),
            },
        )
    }

    /// Write a device image holding `record` at the superblock offset
    fn write_image(root: &TempDir, name: &str, record: &[u8]) -> PathBuf {
        let path = root.path().join(name);
        let mut image = vec![0xa5u8; IMAGE_SIZE];
        let start = SB_START as usize;
        image[start..start + SB_AREA_SIZE].fill(0);
        image[start..start + record.len()].copy_from_slice(record);
        fs::write(&path, &image).unwrap();
        path
    }

    #[test]
    fn test_read_superblock() {
        let root = TempDir::new().unwrap();
        let sb = cache_sb();
        let path = write_image(&root, "nvme0n1", &sb.encode());

        let read = prober(&root, false).read_superblock(&path).unwrap();
        assert_eq!(read.device_uuid(), sb.device_uuid());
        assert_eq!(read.cache().unwrap().journal_buckets.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_read_superblock_errors() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);

        let blank = write_image(&root, "sdx", &[]);
        assert!(matches!(
            prober.read_superblock(&blank),
            Err(Error::Format(FormatError::BadMagic))
        ));

        let short = root.path().join("short");
        fs::write(&short, vec![0u8; 4096]).unwrap();
        assert!(matches!(
            prober.read_superblock(&short),
            Err(Error::Format(FormatError::Truncated { len: 0, need: 4096 }))
        ));

        fs::write(&short, vec![0u8; 6000]).unwrap();
        assert!(matches!(
            prober.read_superblock(&short),
            Err(Error::Format(FormatError::Truncated {
                len: 1904,
                need: 4096
            }))
        ));

        assert!(matches!(
            prober.read_superblock(&root.path().join("missing")),
            Err(Error::DiskIo(_))
        ));
    }

    #[test]
    fn test_probe_records() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);
        let path = write_image(&root, "sdb", &backing_sb().encode());

        let record = prober.probe(&path).unwrap();
        let DeviceRecord::Backing(bdev) = record else {
            panic!("expected backing record");
        };
        assert_eq!(bdev.base.name, path.display().to_string());
        assert_eq!(bdev.data_offset, 8192);
        assert_eq!(bdev.cache_mode, Some(CacheMode::Writearound));
        assert!(bdev.base.identity.is_none());
    }

    #[test]
    fn test_probe_identifies_after_decode() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, true);
        let good = write_image(&root, "sda", &cache_sb().encode());
        let blank = write_image(&root, "sdb", &[]);

        let record = prober
            .probe_with(&good, |_| {
                Ok(DeviceIdentity {
                    model: "WDC WD40EFRX-68N32N0".into(),
                    serial: "WD-WCC7K1234567".into(),
                    firmware: "82.00A82".into(),
                    protocol: IdentifyProtocol::Ata,
                })
            })
            .unwrap();
        assert_eq!(record.base().model(), "WDC WD40EFRX-68N32N0");

        let mut called = false;
        let result = prober.probe_with(&blank, |_| {
            called = true;
            Err(Error::transport("unreachable"))
        });
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn test_identify_failure_degrades_record() {
        let root = TempDir::new().unwrap();
        let path = write_image(&root, "sda", &cache_sb().encode());

        let record = prober(&root, true)
            .probe_with(&path, |_| Err(Error::transport("SG_IO: inappropriate ioctl")))
            .unwrap();
        assert!(record.base().identity.is_none());
        assert_eq!(record.base().model(), "N/A");

        let record = prober(&root, true)
            .probe_with(&path, |_| {
                Err(Error::DiskIo(std::io::Error::from(
                    std::io::ErrorKind::PermissionDenied,
                )))
            })
            .unwrap();
        assert!(record.base().identity.is_none());

        // A regular file cannot answer SG_IO either
        let record = prober(&root, true).probe(&path).unwrap();
        assert!(record.base().identity.is_none());
    }

    #[test]
    fn test_scan_skips_unsupported_version() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);

        let mut v2 = cache_sb().encode().to_vec();
        v2[16..24].copy_from_slice(&2u64.to_le_bytes());

        let paths = vec![
            write_image(&root, "sda", &cache_sb().encode()),
            write_image(&root, "sdb", &v2),
            write_image(&root, "sdc", &backing_sb().encode()),
            root.path().join("sdd"),
        ];

        let report = prober.scan(&paths);
        assert_eq!(report.inventory.len(), 2);
        assert_eq!(report.skipped.len(), 2);

        assert_eq!(report.skipped[0].path, paths[1]);
        assert!(matches!(
            report.skipped[0].error,
            Error::Format(FormatError::UnsupportedVersion(2))
        ));
        assert!(matches!(report.skipped[1].error, Error::DiskIo(_)));
        assert!(report.skipped.iter().all(|s| s.error.is_recoverable()));

        let names: Vec<_> = report.inventory.iter().map(DeviceRecord::name).collect();
        assert_eq!(
            names,
            vec![paths[0].display().to_string(), paths[2].display().to_string()]
        );
    }

    #[test]
    fn test_scan_uses_sysfs_registration() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);
        let sb = cache_sb();
        let path = write_image(&root, "nvme0n1", &sb.encode());
        fs::create_dir_all(
            root.path()
                .join("sys/fs/bcache")
                .join(sb.cache_set_uuid().to_string()),
        )
        .unwrap();

        let report = prober.scan(&[path.clone()]);
        let record = report.inventory.find_by_name(&path.display().to_string()).unwrap();
        assert_eq!(record.base().state, "active");
        assert_eq!(
            report.inventory.cset_to_devname(&sb.cache_set_uuid()),
            Some(path.display().to_string().as_str())
        );
    }

    #[test]
    fn test_kernel_name_follows_symlinks() {
        let root = TempDir::new().unwrap();
        let dev = root.path().join("dev");
        fs::create_dir_all(dev.join("disk/by-id")).unwrap();
        let prober = prober(&root, false);

        let sb = cache_sb();
        let node = write_image(&root, "dev/nvme0n1", &sb.encode());
        let link = dev.join("disk/by-id/nvme-Samsung_SSD_970_S1234");
        std::os::unix::fs::symlink("../../nvme0n1", &link).unwrap();

        assert_eq!(kernel_name(&link), "nvme0n1");
        assert_eq!(kernel_name(&node), "nvme0n1");
        assert_eq!(kernel_name(&dev.join("sdz1")), "sdz1");

        fs::create_dir_all(
            root.path()
                .join("sys/fs/bcache")
                .join(sb.cache_set_uuid().to_string()),
        )
        .unwrap();
        let record = prober.probe(&link).unwrap();
        assert_eq!(record.name(), link.display().to_string());
        assert_eq!(record.base().state, "active");
    }

    #[test]
    fn test_backing_registration_through_symlink() {
        let root = TempDir::new().unwrap();
        let dev = root.path().join("dev");
        fs::create_dir_all(dev.join("disk/by-id")).unwrap();
        let prober = prober(&root, false);

        write_image(&root, "dev/sdb", &backing_sb().encode());
        let link = dev.join("disk/by-id/ata-WDC_WD40EFRX_WD-WCC7K1234567");
        std::os::unix::fs::symlink("../../sdb", &link).unwrap();

        let bcache = root.path().join("sys/class/block/sdb/bcache");
        fs::create_dir_all(&bcache).unwrap();
        fs::write(bcache.join("state"), "clean\n").unwrap();
        std::os::unix::fs::symlink("../../../../devices/virtual/block/bcache3", bcache.join("dev"))
            .unwrap();

        let record = prober.probe(&link).unwrap();
        assert_eq!(record.base().bname, "bcache3");
        assert_eq!(record.base().state, "clean");
    }

    #[test]
    fn test_write_superblock_preserves_surroundings() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);
        let path = write_image(&root, "sdb", &backing_sb().encode());

        // Bytes after the record but inside the 4KB area
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all_at(&[0x5a; 16], SB_START + 4000).unwrap();
        drop(file);

        let mut sb = prober.read_superblock(&path).unwrap();
        sb.backing_mut().unwrap().flags.set_cache_mode(CacheMode::Writeback);
        sb.seq += 1;
        prober.write_superblock(&path, &sb).unwrap();

        let image = fs::read(&path).unwrap();
        assert_eq!(image.len(), IMAGE_SIZE);
        assert!(image[..SB_START as usize].iter().all(|&b| b == 0xa5));
        assert_eq!(&image[SB_START as usize + 4000..SB_START as usize + 4016], &[0x5a; 16]);
        assert!(image[SB_START as usize + SB_AREA_SIZE..].iter().all(|&b| b == 0xa5));

        let reread = prober.read_superblock(&path).unwrap();
        assert_eq!(reread.seq, sb.seq);
        assert_eq!(
            reread.backing().unwrap().flags.cache_mode().unwrap(),
            CacheMode::Writeback
        );
    }

    #[test]
    fn test_set_label() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);
        let path = write_image(&root, "sdb", &backing_sb().encode());

        let updated = prober.set_label(&path, "backup-array").unwrap();
        let reread = prober.read_superblock(&path).unwrap();
        assert_eq!(reread.label.to_string(), "backup-array");
        assert_eq!(reread.checksum, updated.checksum);

        let too_long = "x".repeat(33);
        assert!(matches!(
            prober.set_label(&path, &too_long),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            prober.read_superblock(&path).unwrap().label.to_string(),
            "backup-array"
        );
    }

    #[test]
    fn test_set_label_refuses_invalid_superblock() {
        let root = TempDir::new().unwrap();
        let prober = prober(&root, false);
        let path = write_image(&root, "sdb", &[]);
        let before = fs::read(&path).unwrap();

        assert!(prober.set_label(&path, "data").unwrap_err().is_format());
        assert_eq!(fs::read(&path).unwrap(), before);
    }
}
