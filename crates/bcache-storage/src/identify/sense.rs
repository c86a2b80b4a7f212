//! SCSI completion and sense data interpretation
//!
//! Fixed (0x70/0x71) and descriptor (0x72/0x73) sense formats are
//! normalized into one [`SenseHeader`] so callers can look at the sense key
//! and additional sense code without caring which format the device used.
//! See SPC-3 section 4.5.

use super::transport::ScsiCompletion;
use bcache_common::{DeviceCondition, Error, Result};
use tracing::debug;

/// SAM status: GOOD
pub const SAM_STAT_GOOD: u8 = 0x00;
/// SAM status: CHECK CONDITION
pub const SAM_STAT_CHECK_CONDITION: u8 = 0x02;
/// Driver status: sense buffer is valid
pub const DRIVER_SENSE: u16 = 0x08;

pub const SENSE_NO_SENSE: u8 = 0x00;
pub const SENSE_RECOVERED_ERROR: u8 = 0x01;
pub const SENSE_ABORTED_COMMAND: u8 = 0x0b;

/// ATA Status Return sense descriptor type (SAT)
const ATA_RETURN_DESCRIPTOR: u8 = 0x09;
const ATA_RETURN_DESCRIPTOR_LEN: usize = 14;

/// ATA status register: error
pub const ATA_STAT_ERR: u8 = 1 << 0;
/// ATA status register: data request
pub const ATA_STAT_DRQ: u8 = 1 << 3;

/// Normalized sense header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenseHeader {
    pub response_code: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub byte4: u8,
    pub byte5: u8,
    pub byte6: u8,
    /// Always 0 for fixed format
    pub additional_length: u8,
}

impl SenseHeader {
    /// Parse a sense buffer; only response codes 0x70..=0x73 are accepted
    pub fn parse(sense: &[u8]) -> Result<Self> {
        let Some(&first) = sense.first() else {
            return Err(Error::protocol("empty sense buffer"));
        };
        let response_code = first & 0x7f;
        if !(0x70..=0x73).contains(&response_code) {
            return Err(Error::protocol(format!(
                "unrecognized sense response code {response_code:#04x}"
            )));
        }

        let byte = |i: usize| sense.get(i).copied().unwrap_or(0);
        let mut hdr = Self {
            response_code,
            ..Self::default()
        };

        if response_code >= 0x72 {
            hdr.sense_key = byte(1) & 0x0f;
            hdr.asc = byte(2);
            hdr.ascq = byte(3);
            hdr.byte4 = byte(4);
            hdr.byte5 = byte(5);
            hdr.byte6 = byte(6);
            hdr.additional_length = byte(7);
        } else {
            hdr.sense_key = byte(2) & 0x0f;
            // Fixed format: the buffer is only as long as byte 7 says
            let valid = if sense.len() > 7 {
                sense.len().min(usize::from(sense[7]) + 8)
            } else {
                sense.len()
            };
            if valid > 12 {
                hdr.asc = sense[12];
            }
            if valid > 13 {
                hdr.ascq = sense[13];
            }
        }

        Ok(hdr)
    }

    #[must_use]
    pub const fn is_descriptor_format(&self) -> bool {
        self.response_code >= 0x72
    }

    /// NO SENSE and RECOVERED ERROR do not indicate a failed command
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self.sense_key, SENSE_NO_SENSE | SENSE_RECOVERED_ERROR)
    }

    #[must_use]
    pub const fn condition(&self) -> DeviceCondition {
        DeviceCondition::Sense {
            key: self.sense_key,
            asc: self.asc,
            ascq: self.ascq,
        }
    }
}

/// ATA status and error registers from an ATA Status Return descriptor,
/// if the descriptor-format sense buffer carries one
#[must_use]
pub fn ata_return_registers(sense: &[u8]) -> Option<(u8, u8)> {
    if sense.len() < 8 || sense[0] & 0x7f < 0x72 {
        return None;
    }
    let end = sense.len().min(8 + usize::from(sense[7]));
    let mut pos = 8;
    while pos + 2 <= end {
        let kind = sense[pos];
        let len = usize::from(sense[pos + 1]) + 2;
        if kind == ATA_RETURN_DESCRIPTOR && len >= ATA_RETURN_DESCRIPTOR_LEN && pos + len <= end {
            return Some((sense[pos + 13], sense[pos + 3]));
        }
        pos += len;
    }
    None
}

/// Turn a SCSI completion into success or a typed failure.
///
/// GOOD means success. CHECK CONDITION with DRIVER_SENSE defers to the
/// sense buffer. Anything else, including a non-zero host status, is a
/// transport failure.
pub fn check_completion(completion: &ScsiCompletion, sense: &[u8]) -> Result<()> {
    if completion.host_status != 0 {
        return Err(Error::transport(format!(
            "host status {:#06x}",
            completion.host_status
        )));
    }

    let driver = completion.driver_status & 0x0f;
    match (completion.status, driver) {
        (SAM_STAT_GOOD, 0) => Ok(()),
        (SAM_STAT_CHECK_CONDITION, DRIVER_SENSE) => {
            let sense = &sense[..completion.sense_len.min(sense.len())];
            let hdr = SenseHeader::parse(sense)?;
            debug!(
                "sense: response {:#04x} key {:#04x} asc {:#04x} ascq {:#04x}",
                hdr.response_code, hdr.sense_key, hdr.asc, hdr.ascq
            );

            if !hdr.is_benign() {
                return Err(Error::DeviceReported(hdr.condition()));
            }
            match ata_return_registers(sense) {
                Some((status, error)) if status & ATA_STAT_ERR != 0 => {
                    Err(Error::DeviceReported(DeviceCondition::AtaStatus { status, error }))
                }
                _ => Ok(()),
            }
        }
        (status, driver) => Err(Error::transport(format!(
            "SCSI status {status:#04x}, driver status {driver:#04x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_condition(sense_len: usize) -> ScsiCompletion {
        ScsiCompletion {
            status: SAM_STAT_CHECK_CONDITION,
            driver_status: DRIVER_SENSE,
            sense_len,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_fixed_sense() {
        let mut sense = [0u8; 18];
        sense[0] = 0xf0; // valid bit + 0x70
        sense[2] = 0x05; // ILLEGAL REQUEST
        sense[7] = 10;
        sense[12] = 0x24;
        sense[13] = 0x01;

        let hdr = SenseHeader::parse(&sense).unwrap();
        assert_eq!(hdr.response_code, 0x70);
        assert_eq!(hdr.sense_key, 0x05);
        assert_eq!((hdr.asc, hdr.ascq), (0x24, 0x01));
        assert!(!hdr.is_descriptor_format());
        assert_eq!(hdr.additional_length, 0);
    }

    #[test]
    fn test_fixed_sense_respects_additional_length() {
        let mut sense = [0u8; 18];
        sense[0] = 0x71;
        sense[2] = 0x03;
        sense[7] = 4; // asc/ascq not included
        sense[12] = 0x11;
        sense[13] = 0x04;

        let hdr = SenseHeader::parse(&sense).unwrap();
        assert_eq!(hdr.sense_key, 0x03);
        assert_eq!((hdr.asc, hdr.ascq), (0, 0));
    }

    #[test]
    fn test_parse_descriptor_sense() {
        let sense = [0x72, 0x0b, 0x00, 0x00, 0, 0, 0, 0];
        let hdr = SenseHeader::parse(&sense).unwrap();
        assert!(hdr.is_descriptor_format());
        assert_eq!(hdr.sense_key, SENSE_ABORTED_COMMAND);
    }

    #[test]
    fn test_unrecognized_response_codes() {
        for code in [0x00u8, 0x6f, 0x74, 0x7f] {
            let sense = [code, 0, 0x05, 0, 0, 0, 0, 10];
            assert!(matches!(
                SenseHeader::parse(&sense),
                Err(Error::ProtocolViolation(_))
            ));
        }
        assert!(SenseHeader::parse(&[]).is_err());
    }

    #[test]
    fn test_good_status() {
        assert!(check_completion(&ScsiCompletion::default(), &[]).is_ok());
    }

    #[test]
    fn test_check_condition_reports_sense() {
        let mut sense = [0u8; 32];
        sense[0] = 0x70;
        sense[2] = 0x04;
        sense[7] = 10;
        sense[12] = 0x44;

        let err = check_completion(&check_condition(18), &sense).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceReported(DeviceCondition::Sense {
                key: 0x04,
                asc: 0x44,
                ascq: 0
            })
        ));
    }

    #[test]
    fn test_recovered_error_is_success() {
        // ATA PASS-THROUGH information available
        let sense = [0x72, 0x01, 0x00, 0x1d, 0, 0, 0, 0];
        assert!(check_completion(&check_condition(8), &sense).is_ok());
    }

    #[test]
    fn test_ata_return_descriptor_with_err() {
        let mut sense = [0u8; 22];
        sense[..8].copy_from_slice(&[0x72, 0x01, 0x00, 0x1d, 0, 0, 0, 14]);
        sense[8] = ATA_RETURN_DESCRIPTOR;
        sense[9] = 12;
        sense[11] = 0x04; // error: ABRT
        sense[21] = 0x51; // status: DRDY | DSC | ERR

        assert_eq!(ata_return_registers(&sense), Some((0x51, 0x04)));
        let err = check_completion(&check_condition(22), &sense).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceReported(DeviceCondition::AtaStatus {
                status: 0x51,
                error: 0x04
            })
        ));
    }

    #[test]
    fn test_unparseable_sense_on_check_condition() {
        let sense = [0x00u8; 18];
        assert!(matches!(
            check_completion(&check_condition(18), &sense),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            check_completion(&check_condition(0), &sense),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_other_combinations_are_transport_errors() {
        let busy = ScsiCompletion {
            status: 0x08,
            ..Default::default()
        };
        assert!(matches!(check_completion(&busy, &[]), Err(Error::Transport(_))));

        let no_driver_sense = ScsiCompletion {
            status: SAM_STAT_CHECK_CONDITION,
            ..Default::default()
        };
        assert!(matches!(
            check_completion(&no_driver_sense, &[]),
            Err(Error::Transport(_))
        ));

        let host_error = ScsiCompletion {
            host_status: 0x01,
            ..Default::default()
        };
        assert!(matches!(
            check_completion(&host_error, &[]),
            Err(Error::Transport(_))
        ));
    }
}
