//! Error types for bcache metadata tooling
//!
//! Every failure here is returned to the caller as a typed result. An
//! inventory scan treats all of them as "skip or degrade this device";
//! only argument and configuration errors reflect a caller mistake.

use thiserror::Error;

/// Common result type for bcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a superblock was rejected by the codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("bad superblock magic")]
    BadMagic,

    #[error("unsupported superblock version {0}")]
    UnsupportedVersion(u64),

    #[error("superblock checksum mismatch: stored {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("superblock truncated: have {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },

    #[error("journal/key count {count} exceeds table capacity")]
    JournalOverflow { count: u16 },
}

/// A condition reported by the device itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCondition {
    /// SCSI sense data (also carries ATA errors translated by SAT)
    Sense { key: u8, asc: u8, ascq: u8 },
    /// ATA status register with ERR set, taken from an ATA return descriptor
    AtaStatus { status: u8, error: u8 },
    /// Non-zero NVMe completion status
    Nvme { status: u32 },
}

impl std::fmt::Display for DeviceCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sense { key, asc, ascq } => {
                write!(f, "sense key {key:#04x}, asc {asc:#04x}, ascq {ascq:#04x}")
            }
            Self::AtaStatus { status, error } => {
                write!(f, "ATA status {status:#04x}, error {error:#04x}")
            }
            Self::Nvme { status } => write!(f, "NVMe status {status:#06x}"),
        }
    }
}

/// Common error type for bcache operations
#[derive(Debug, Error)]
pub enum Error {
    // On-disk format errors
    #[error("invalid superblock: {0}")]
    Format(#[from] FormatError),

    #[error("invalid value {value} for flag field {field}")]
    InvalidFlag { field: &'static str, value: u64 },

    // Device-identify errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("device reported {0}")]
    DeviceReported(DeviceCondition),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // I/O errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    // Caller errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this error came from superblock validation
    #[must_use]
    pub const fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Check if this error came from a device-identify exchange
    #[must_use]
    pub const fn is_identify_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::DeviceReported(_) | Self::ProtocolViolation(_)
        )
    }

    /// Check if a scan may skip the device and continue
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidArgument(_) | Self::Configuration(_))
    }
}
