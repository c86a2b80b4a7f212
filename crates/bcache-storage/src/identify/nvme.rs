//! NVMe Identify Controller

use super::transport::{NvmeAdminCommand, Passthrough};
use super::{DeviceIdentity, IdentifyProtocol, ascii_field};
use bcache_common::{DeviceCondition, Error, Result};

/// Admin opcode: Identify
pub const NVME_ADMIN_IDENTIFY: u8 = 0x06;

/// Size of every Identify data structure
pub const NVME_IDENTIFY_DATA_SIZE: usize = 4096;

/// CNS value selecting the Identify Controller structure
pub const NVME_ID_CNS_CTRL: u32 = 0x01;

// Byte ranges in the Identify Controller structure
const VID: std::ops::Range<usize> = 0..2;
const SSVID: std::ops::Range<usize> = 2..4;
const SERIAL: std::ops::Range<usize> = 4..24;
const MODEL: std::ops::Range<usize> = 24..64;
const FIRMWARE: std::ops::Range<usize> = 64..72;

/// Identify Controller admin command
#[must_use]
pub const fn identify_controller_command() -> NvmeAdminCommand {
    NvmeAdminCommand {
        opcode: NVME_ADMIN_IDENTIFY,
        nsid: 0,
        cdw10: NVME_ID_CNS_CTRL,
        cdw11: 0,
        data_len: NVME_IDENTIFY_DATA_SIZE as u32,
    }
}

/// Fields decoded from an Identify Controller structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NvmeControllerData {
    pub vendor_id: u16,
    pub subsystem_vendor_id: u16,
    pub serial: String,
    pub model: String,
    pub firmware: String,
}

/// Decode an Identify Controller response
pub fn parse_identify_controller(data: &[u8]) -> Result<NvmeControllerData> {
    if data.len() != NVME_IDENTIFY_DATA_SIZE {
        return Err(Error::protocol(format!(
            "NVMe identify data is {} bytes, expected {NVME_IDENTIFY_DATA_SIZE}",
            data.len()
        )));
    }

    let parsed = NvmeControllerData {
        vendor_id: u16::from_le_bytes([data[VID.start], data[VID.start + 1]]),
        subsystem_vendor_id: u16::from_le_bytes([data[SSVID.start], data[SSVID.start + 1]]),
        serial: ascii_field(&data[SERIAL]),
        model: ascii_field(&data[MODEL]),
        firmware: ascii_field(&data[FIRMWARE]),
    };

    if parsed.vendor_id == 0 && parsed.model.is_empty() && parsed.serial.is_empty() {
        return Err(Error::protocol("NVMe identify data is empty"));
    }
    Ok(parsed)
}

/// Identify an NVMe controller
pub fn identify<T: Passthrough + ?Sized>(transport: &mut T) -> Result<DeviceIdentity> {
    let cmd = identify_controller_command();
    let mut data = vec![0u8; NVME_IDENTIFY_DATA_SIZE];

    let status = transport.nvme_admin(&cmd, &mut data)?;
    if status != 0 {
        return Err(Error::DeviceReported(DeviceCondition::Nvme { status }));
    }

    let parsed = parse_identify_controller(&data)?;
    Ok(DeviceIdentity {
        model: parsed.model,
        serial: parsed.serial,
        firmware: parsed.firmware,
        protocol: IdentifyProtocol::Nvme,
    })
}
