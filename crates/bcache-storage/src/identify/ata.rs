//! ATA IDENTIFY over SCSI/ATA Translation (ATA PASS-THROUGH 16)

use super::sense::{SENSE_ABORTED_COMMAND, check_completion};
use super::transport::{DataDirection, Passthrough};
use super::{DeviceIdentity, IdentifyProtocol, ascii_field};
use bcache_common::{DeviceCondition, Error, Result};
use tracing::debug;

/// ATA PASS-THROUGH (16) operation code
pub const SG_ATA_16: u8 = 0x85;
pub const SG_ATA_16_LEN: usize = 16;

/// Protocol field: PIO Data-in
pub const SG_ATA_PROTO_PIO_IN: u8 = 4 << 1;

/// Transfer length is in the sector count field
pub const SG_CDB2_TLEN_NSECT: u8 = 2 << 0;
/// Transfer length is counted in 512-byte blocks
pub const SG_CDB2_TLEN_SECTORS: u8 = 1 << 2;
/// Data flows from the device
pub const SG_CDB2_TDIR_FROM_DEV: u8 = 1 << 3;
/// Ask for ATA registers in sense data even on success
pub const SG_CDB2_CHECK_COND: u8 = 1 << 5;

pub const ATA_OP_IDENTIFY: u8 = 0xec;
pub const ATA_OP_PIDENTIFY: u8 = 0xa1;

/// Device register: LBA addressing
pub const ATA_USING_LBA: u8 = 1 << 6;

/// ATA error register: command aborted
const ATA_ERR_ABRT: u8 = 1 << 2;

/// Size of IDENTIFY (PACKET) DEVICE data
pub const ATA_IDENTIFY_DATA_SIZE: usize = 512;

// Word offsets into IDENTIFY data
const WORD_GENERAL_CONFIG: usize = 0;
const WORD_SERIAL: (usize, usize) = (10, 10);
const WORD_FIRMWARE: (usize, usize) = (23, 4);
const WORD_MODEL: (usize, usize) = (27, 20);
const WORD_INTEGRITY: usize = 255;

const INTEGRITY_SIGNATURE: u8 = 0xa5;

/// IDENTIFY variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtaIdentify {
    /// IDENTIFY DEVICE, for ATA disks
    Device,
    /// IDENTIFY PACKET DEVICE, for ATAPI devices
    Packet,
}

impl AtaIdentify {
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Device => ATA_OP_IDENTIFY,
            Self::Packet => ATA_OP_PIDENTIFY,
        }
    }
}

/// Build the ATA PASS-THROUGH (16) command block for an IDENTIFY.
///
/// ```text
///  0  0x85          operation code
///  1  0x08          protocol PIO data-in, no extend
///  2  0x0e          t_length in sector count, in blocks, from device
///  6  0x01          one 512-byte block
/// 13  0x40          device: LBA
/// 14  0xec / 0xa1   ATA command
/// ```
#[must_use]
pub const fn identify_cdb(kind: AtaIdentify) -> [u8; SG_ATA_16_LEN] {
    let mut cdb = [0u8; SG_ATA_16_LEN];
    cdb[0] = SG_ATA_16;
    cdb[1] = SG_ATA_PROTO_PIO_IN;
    cdb[2] = SG_CDB2_TLEN_NSECT | SG_CDB2_TLEN_SECTORS | SG_CDB2_TDIR_FROM_DEV;
    cdb[6] = 1; // sector count
    cdb[13] = ATA_USING_LBA;
    cdb[14] = kind.opcode();
    cdb
}

/// Fields decoded from IDENTIFY data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtaIdentifyData {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    /// Word 0 bit 15: the responder is an ATAPI device
    pub atapi: bool,
}

/// Read `count` words starting at `word`, swapping each word's bytes
fn ata_string(data: &[u8], (word, count): (usize, usize)) -> String {
    let raw = &data[word * 2..(word + count) * 2];
    let swapped: Vec<u8> = raw.chunks_exact(2).flat_map(|pair| [pair[1], pair[0]]).collect();
    ascii_field(&swapped)
}

/// Decode an IDENTIFY (PACKET) DEVICE response
pub fn parse_identify(data: &[u8]) -> Result<AtaIdentifyData> {
    if data.len() != ATA_IDENTIFY_DATA_SIZE {
        return Err(Error::protocol(format!(
            "ATA identify data is {} bytes, expected {ATA_IDENTIFY_DATA_SIZE}",
            data.len()
        )));
    }

    // Word 255: signature 0xa5 in the low byte means the whole sector
    // must sum to zero.
    if data[WORD_INTEGRITY * 2] == INTEGRITY_SIGNATURE {
        let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(Error::protocol(format!(
                "ATA identify integrity checksum failed (sum {sum:#04x})"
            )));
        }
    }

    let general = u16::from_le_bytes([
        data[WORD_GENERAL_CONFIG * 2],
        data[WORD_GENERAL_CONFIG * 2 + 1],
    ]);

    Ok(AtaIdentifyData {
        model: ata_string(data, WORD_MODEL),
        serial: ata_string(data, WORD_SERIAL),
        firmware: ata_string(data, WORD_FIRMWARE),
        atapi: general & 0x8000 != 0,
    })
}

fn is_aborted(err: &Error) -> bool {
    match err {
        Error::DeviceReported(DeviceCondition::Sense { key, .. }) => *key == SENSE_ABORTED_COMMAND,
        Error::DeviceReported(DeviceCondition::AtaStatus { error, .. }) => {
            error & ATA_ERR_ABRT != 0
        }
        _ => false,
    }
}

/// Issue one IDENTIFY variant and decode the response
pub fn identify_with<T: Passthrough + ?Sized>(
    transport: &mut T,
    kind: AtaIdentify,
) -> Result<AtaIdentifyData> {
    let cdb = identify_cdb(kind);
    let mut data = vec![0u8; ATA_IDENTIFY_DATA_SIZE];
    let mut sense = [0u8; 32];

    let completion = transport.scsi(&cdb, DataDirection::FromDevice, &mut data, &mut sense)?;
    check_completion(&completion, &sense)?;

    if completion.residual != 0 {
        return Err(Error::protocol(format!(
            "ATA identify transferred {} of {ATA_IDENTIFY_DATA_SIZE} bytes",
            ATA_IDENTIFY_DATA_SIZE.saturating_sub(completion.residual)
        )));
    }
    parse_identify(&data)
}

/// Identify an ATA or ATAPI device.
///
/// IDENTIFY DEVICE is tried first; ATAPI devices abort it, in which case
/// IDENTIFY PACKET DEVICE is issued once.
pub fn identify<T: Passthrough + ?Sized>(transport: &mut T) -> Result<DeviceIdentity> {
    let (data, protocol) = match identify_with(transport, AtaIdentify::Device) {
        Ok(data) => (data, IdentifyProtocol::Ata),
        Err(e) if is_aborted(&e) => {
            debug!("IDENTIFY DEVICE aborted, retrying with IDENTIFY PACKET DEVICE");
            (
                identify_with(transport, AtaIdentify::Packet)?,
                IdentifyProtocol::Atapi,
            )
        }
        Err(e) => return Err(e),
    };

    Ok(DeviceIdentity {
        model: data.model,
        serial: data.serial,
        firmware: data.firmware,
        protocol,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identify::transport::{NvmeAdminCommand, ScsiCompletion};
    use crate::identify::sense::{DRIVER_SENSE, SAM_STAT_CHECK_CONDITION, SENSE_RECOVERED_ERROR};

    /// Store `text` as an ATA string field (space padded, byte swapped)
    pub(crate) fn put_ata_string(data: &mut [u8], (word, count): (usize, usize), text: &str) {
        let mut padded = vec![b' '; count * 2];
        padded[..text.len()].copy_from_slice(text.as_bytes());
        for (i, pair) in padded.chunks_exact(2).enumerate() {
            data[(word + i) * 2] = pair[1];
            data[(word + i) * 2 + 1] = pair[0];
        }
    }

    pub(crate) fn identify_sector(model: &str, serial: &str, firmware: &str) -> Vec<u8> {
        let mut data = vec![0u8; ATA_IDENTIFY_DATA_SIZE];
        data[0] = 0x40; // fixed device
        put_ata_string(&mut data, WORD_MODEL, model);
        put_ata_string(&mut data, WORD_SERIAL, serial);
        put_ata_string(&mut data, WORD_FIRMWARE, firmware);
        data
    }

    /// Canned SCSI responder that records every command block
    pub(crate) struct MockAta {
        pub responses: Vec<std::result::Result<Vec<u8>, Vec<u8>>>,
        pub cdbs: Vec<Vec<u8>>,
    }

    impl Passthrough for MockAta {
        fn scsi(
            &mut self,
            cdb: &[u8],
            _direction: DataDirection,
            data: &mut [u8],
            sense: &mut [u8],
        ) -> Result<ScsiCompletion> {
            self.cdbs.push(cdb.to_vec());
            if self.responses.is_empty() {
                return Err(Error::transport("no device"));
            }
            match self.responses.remove(0) {
                Ok(payload) => {
                    data[..payload.len()].copy_from_slice(&payload);
                    Ok(ScsiCompletion::default())
                }
                Err(sense_bytes) => {
                    sense[..sense_bytes.len()].copy_from_slice(&sense_bytes);
                    Ok(ScsiCompletion {
                        status: SAM_STAT_CHECK_CONDITION,
                        driver_status: DRIVER_SENSE,
                        sense_len: sense_bytes.len(),
                        ..Default::default()
                    })
                }
            }
        }

        fn nvme_admin(&mut self, _cmd: &NvmeAdminCommand, _data: &mut [u8]) -> Result<u32> {
            Err(Error::transport("not an NVMe device"))
        }
    }

    #[test]
    fn test_identify_cdb_golden() {
        assert_eq!(
            identify_cdb(AtaIdentify::Device),
            [
                0x85, 0x08, 0x0e, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x40, 0xec, 0x00
            ]
        );
        assert_eq!(identify_cdb(AtaIdentify::Packet)[14], 0xa1);
    }

    #[test]
    fn test_parse_identify_swaps_words() {
        let data = identify_sector("Samsung SSD 870 EVO 1TB", "S6PNNX0R123456A", "SVT02B6Q");
        let parsed = parse_identify(&data).unwrap();
        assert_eq!(parsed.model, "Samsung SSD 870 EVO 1TB");
        assert_eq!(parsed.serial, "S6PNNX0R123456A");
        assert_eq!(parsed.firmware, "SVT02B6Q");
        assert!(!parsed.atapi);

        // Serial "S6" is stored as "6S" on the wire
        assert_eq!(&data[20..22], b"6S");
    }

    #[test]
    fn test_parse_identify_wrong_length() {
        assert!(matches!(
            parse_identify(&[0u8; 256]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_parse_identify_integrity_word() {
        let mut data = identify_sector("DISK", "1234", "1.0");
        data[510] = INTEGRITY_SIGNATURE;
        let sum = data[..511].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[511] = 0u8.wrapping_sub(sum);
        assert!(parse_identify(&data).is_ok());

        data[100] ^= 0x01;
        assert!(matches!(
            parse_identify(&data),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_identify_ata_device() {
        let mut mock = MockAta {
            responses: vec![Ok(identify_sector("WDC WD40EFRX", "WD-WCC4E1234567", "82.00A82"))],
            cdbs: Vec::new(),
        };
        let id = identify(&mut mock).unwrap();
        assert_eq!(id.model, "WDC WD40EFRX");
        assert_eq!(id.serial, "WD-WCC4E1234567");
        assert_eq!(id.protocol, IdentifyProtocol::Ata);
        assert_eq!(mock.cdbs.len(), 1);
        assert_eq!(mock.cdbs[0][14], ATA_OP_IDENTIFY);
    }

    #[test]
    fn test_identify_falls_back_to_packet() {
        let aborted = vec![0x72, SENSE_ABORTED_COMMAND, 0x00, 0x00, 0, 0, 0, 0];
        let mut packet = identify_sector("HL-DT-ST DVDRAM", "K1234", "1.00");
        packet[1] = 0x85; // ATAPI, CD-ROM

        let mut mock = MockAta {
            responses: vec![Err(aborted), Ok(packet)],
            cdbs: Vec::new(),
        };
        let id = identify(&mut mock).unwrap();
        assert_eq!(id.protocol, IdentifyProtocol::Atapi);
        assert_eq!(id.model, "HL-DT-ST DVDRAM");
        assert_eq!(mock.cdbs[1][14], ATA_OP_PIDENTIFY);
    }

    /// Descriptor sense with RECOVERED ERROR and an ATA Status Return
    /// descriptor carrying `status` and `error`
    fn ata_return_sense(status: u8, error: u8) -> Vec<u8> {
        let mut sense = vec![0x72, SENSE_RECOVERED_ERROR, 0x00, 0x1d, 0, 0, 0, 14];
        let mut descriptor = [0u8; 14];
        descriptor[0] = 0x09;
        descriptor[1] = 12;
        descriptor[3] = error;
        descriptor[13] = status;
        sense.extend_from_slice(&descriptor);
        sense
    }

    #[test]
    fn test_identify_falls_back_on_ata_abort_status() {
        let mut packet = identify_sector("TSSTcorp CDDVDW SH-224DB", "R8RS6GDC", "SB01");
        packet[1] = 0x85;

        let mut mock = MockAta {
            responses: vec![Err(ata_return_sense(0x51, ATA_ERR_ABRT)), Ok(packet)],
            cdbs: Vec::new(),
        };
        let id = identify(&mut mock).unwrap();
        assert_eq!(id.protocol, IdentifyProtocol::Atapi);
        assert_eq!(id.model, "TSSTcorp CDDVDW SH-224DB");
        assert_eq!(mock.cdbs.len(), 2);
        assert_eq!(mock.cdbs[0][14], ATA_OP_IDENTIFY);
        assert_eq!(mock.cdbs[1][14], ATA_OP_PIDENTIFY);
    }

    #[test]
    fn test_ata_error_without_abort_is_not_retried() {
        let mut mock = MockAta {
            responses: vec![Err(ata_return_sense(0x51, 0x40))],
            cdbs: Vec::new(),
        };
        let err = identify(&mut mock).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceReported(DeviceCondition::AtaStatus {
                status: 0x51,
                error: 0x40
            })
        ));
        assert_eq!(mock.cdbs.len(), 1);
    }

    #[test]
    fn test_identify_sense_error_is_not_retried() {
        let medium = vec![0x70, 0, 0x03, 0, 0, 0, 0, 10, 0, 0, 0, 0, 0x11, 0x00];
        let mut mock = MockAta {
            responses: vec![Err(medium)],
            cdbs: Vec::new(),
        };
        let err = identify(&mut mock).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceReported(DeviceCondition::Sense {
                key: 0x03,
                asc: 0x11,
                ascq: 0
            })
        ));
        assert_eq!(mock.cdbs.len(), 1);
    }

    #[test]
    fn test_identify_transport_failure() {
        let mut mock = MockAta {
            responses: Vec::new(),
            cdbs: Vec::new(),
        };
        assert!(matches!(identify(&mut mock), Err(Error::Transport(_))));
    }
}
