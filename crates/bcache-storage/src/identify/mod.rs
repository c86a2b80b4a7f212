//! Device identification
//!
//! Model and serial number are not recorded in the superblock, so they are
//! read from the device with a protocol-level IDENTIFY:
//! - SATA disks behind a SCSI/ATA translation layer: ATA PASS-THROUGH (16)
//!   carrying IDENTIFY DEVICE (or IDENTIFY PACKET DEVICE)
//! - NVMe controllers: admin Identify Controller
//!
//! Any failure is returned as a typed error; callers degrade the device
//! record to an unknown model rather than aborting.

pub mod ata;
pub mod nvme;
pub mod sense;
pub mod transport;

use bcache_common::Result;
use serde::Serialize;
pub use transport::{DataDirection, NvmeAdminCommand, Passthrough, ScsiCompletion, SgPassthrough};

/// Protocol that produced an identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifyProtocol {
    Ata,
    Atapi,
    Nvme,
}

/// Command set to use for a device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    /// SCSI block device (sd*), possibly an ATA disk behind SAT
    Scsi,
    /// NVMe namespace or controller
    Nvme,
}

impl DeviceClass {
    /// Guess the class from a kernel device name (`sda`, `nvme0n1p2`, ...)
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("nvme") {
            Self::Nvme
        } else {
            Self::Scsi
        }
    }
}

/// Static attributes reported by a device
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub protocol: IdentifyProtocol,
}

/// Decode a space/NUL padded ASCII field
pub(crate) fn ascii_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// Identify a device with the command set matching its class
pub fn identify<T: Passthrough + ?Sized>(
    transport: &mut T,
    class: DeviceClass,
) -> Result<DeviceIdentity> {
    match class {
        DeviceClass::Scsi => ata::identify(transport),
        DeviceClass::Nvme => nvme::identify(transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcache_common::Error;

    #[test]
    fn test_device_class_from_name() {
        assert_eq!(DeviceClass::from_name("sda"), DeviceClass::Scsi);
        assert_eq!(DeviceClass::from_name("sdb1"), DeviceClass::Scsi);
        assert_eq!(DeviceClass::from_name("nvme0n1"), DeviceClass::Nvme);
        assert_eq!(DeviceClass::from_name("nvme1n1p3"), DeviceClass::Nvme);
    }

    #[test]
    fn test_ascii_field() {
        assert_eq!(ascii_field(b"  ST4000DM004  \0\0"), "ST4000DM004");
        assert_eq!(ascii_field(b"\0\0\0\0"), "");
    }

    #[test]
    fn test_identify_dispatches_by_class() {
        let mut mock = nvme::tests::MockNvme {
            status: 0,
            data: nvme::tests::controller_data("NVME MODEL", "SN1", "FW1"),
            commands: Vec::new(),
        };
        assert_eq!(
            identify(&mut mock, DeviceClass::Nvme).unwrap().model,
            "NVME MODEL"
        );
        // The NVMe mock refuses SCSI commands
        assert!(matches!(
            identify(&mut mock, DeviceClass::Scsi),
            Err(Error::Transport(_))
        ));
    }
}
