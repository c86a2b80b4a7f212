//! CRC-64 checksum engine
//!
//! bcache protects its superblock and its keyed on-disk sets with the
//! ECMA-182 polynomial in the non-reflected form, seeded with all ones and
//! inverted on output (CRC-64/WE). The value is persisted and cross-checked
//! by the kernel driver and by other tools, so the parameters are fixed.

use crc::{CRC_64_WE, Crc};

/// Offset of the first checksummed byte in a checksummed set. The leading
/// eight bytes hold the checksum itself.
pub const CSUM_SKIP: usize = 8;

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_WE);

/// Compute the CRC-64 of a byte span
#[inline]
#[must_use]
pub fn crc64(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Checksum a set whose checksum lives in its first eight bytes.
///
/// `set` must already be cut at the end of its active region (for a
/// superblock, the end of the live journal/key entries).
#[must_use]
pub fn csum_set(set: &[u8]) -> u64 {
    crc64(set.get(CSUM_SKIP..).unwrap_or_default())
}
