//! Pass-through transports
//!
//! The protocol builders in this module tree only produce command blocks
//! and interpret responses. Getting those bytes to the device is the job of
//! a [`Passthrough`] implementation: [`SgPassthrough`] issues Linux SG_IO
//! and NVMe admin ioctls, tests substitute canned responders.

use bcache_common::{Error, Result};
use std::fs::File;

/// Direction of the data phase of a SCSI command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataDirection {
    None,
    ToDevice,
    FromDevice,
}

/// Completion of a SCSI pass-through command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScsiCompletion {
    /// SAM status byte
    pub status: u8,
    /// Host adapter status; non-zero means the command never completed
    pub host_status: u16,
    /// Driver status (`DRIVER_SENSE` when sense data was returned)
    pub driver_status: u16,
    /// Bytes of sense data written
    pub sense_len: usize,
    /// Bytes of the data buffer not transferred
    pub residual: usize,
}

/// NVMe admin command, as passed to the admin pass-through ioctl
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NvmeAdminCommand {
    pub opcode: u8,
    pub nsid: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    /// Expected data transfer length; must equal the buffer length
    pub data_len: u32,
}

/// Raw command pass-through to a storage device
pub trait Passthrough {
    /// Issue a SCSI command block, filling `data` (for `FromDevice`) and
    /// `sense` as the device returns them.
    ///
    /// `Err` means the command could not be delivered at all.
    fn scsi(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        sense: &mut [u8],
    ) -> Result<ScsiCompletion>;

    /// Issue an NVMe admin command and return its completion status
    /// (zero on success).
    fn nvme_admin(&mut self, cmd: &NvmeAdminCommand, data: &mut [u8]) -> Result<u32>;
}

/// Default pass-through timeout
pub const PASSTHROUGH_TIMEOUT_MS: u32 = 15_000;

/// Pass-through over a device node using the Linux SG_IO and
/// NVME_IOCTL_ADMIN_CMD ioctls
#[derive(Debug)]
pub struct SgPassthrough<'a> {
    file: &'a File,
    timeout_ms: u32,
}

impl<'a> SgPassthrough<'a> {
    #[must_use]
    pub const fn new(file: &'a File) -> Self {
        Self {
            file,
            timeout_ms: PASSTHROUGH_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[cfg(target_os = "linux")]
mod sys {
    /// `struct sg_io_hdr` from <scsi/sg.h>
    #[repr(C)]
    pub struct SgIoHdr {
        pub interface_id: libc::c_int,
        pub dxfer_direction: libc::c_int,
        pub cmd_len: libc::c_uchar,
        pub mx_sb_len: libc::c_uchar,
        pub iovec_count: libc::c_ushort,
        pub dxfer_len: libc::c_uint,
        pub dxferp: *mut libc::c_void,
        pub cmdp: *const libc::c_uchar,
        pub sbp: *mut libc::c_uchar,
        pub timeout: libc::c_uint,
        pub flags: libc::c_uint,
        pub pack_id: libc::c_int,
        pub usr_ptr: *mut libc::c_void,
        pub status: libc::c_uchar,
        pub masked_status: libc::c_uchar,
        pub msg_status: libc::c_uchar,
        pub sb_len_wr: libc::c_uchar,
        pub host_status: libc::c_ushort,
        pub driver_status: libc::c_ushort,
        pub resid: libc::c_int,
        pub duration: libc::c_uint,
        pub info: libc::c_uint,
    }

    /// `struct nvme_passthru_cmd` from <linux/nvme_ioctl.h>
    #[repr(C)]
    #[derive(Default)]
    pub struct NvmePassthruCmd {
        pub opcode: u8,
        pub flags: u8,
        pub rsvd1: u16,
        pub nsid: u32,
        pub cdw2: u32,
        pub cdw3: u32,
        pub metadata: u64,
        pub addr: u64,
        pub metadata_len: u32,
        pub data_len: u32,
        pub cdw10: u32,
        pub cdw11: u32,
        pub cdw12: u32,
        pub cdw13: u32,
        pub cdw14: u32,
        pub cdw15: u32,
        pub timeout_ms: u32,
        pub result: u32,
    }

    pub const SG_INTERFACE_ID: libc::c_int = b'S' as libc::c_int;
    pub const SG_DXFER_NONE: libc::c_int = -1;
    pub const SG_DXFER_TO_DEV: libc::c_int = -2;
    pub const SG_DXFER_FROM_DEV: libc::c_int = -3;

    nix::ioctl_readwrite_bad!(sg_io, 0x2285, SgIoHdr);
    nix::ioctl_readwrite!(nvme_admin_cmd, b'N', 0x41, NvmePassthruCmd);
}

#[cfg(target_os = "linux")]
impl Passthrough for SgPassthrough<'_> {
    fn scsi(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        sense: &mut [u8],
    ) -> Result<ScsiCompletion> {
        use std::os::unix::io::AsRawFd;

        let cmd_len = u8::try_from(cdb.len())
            .map_err(|_| Error::invalid_argument("command block longer than 255 bytes"))?;
        let mx_sb_len = u8::try_from(sense.len()).unwrap_or(u8::MAX);
        let dxfer_len = u32::try_from(data.len())
            .map_err(|_| Error::invalid_argument("data buffer exceeds 4 GiB"))?;

        let mut hdr = sys::SgIoHdr {
            interface_id: sys::SG_INTERFACE_ID,
            dxfer_direction: match direction {
                DataDirection::None => sys::SG_DXFER_NONE,
                DataDirection::ToDevice => sys::SG_DXFER_TO_DEV,
                DataDirection::FromDevice => sys::SG_DXFER_FROM_DEV,
            },
            cmd_len,
            mx_sb_len,
            iovec_count: 0,
            dxfer_len,
            dxferp: data.as_mut_ptr().cast(),
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: self.timeout_ms,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in hdr refers to a live buffer of the
        // advertised length for the duration of the call.
        unsafe { sys::sg_io(self.file.as_raw_fd(), &mut hdr) }
            .map_err(|e| Error::transport(format!("SG_IO failed: {e}")))?;

        Ok(ScsiCompletion {
            status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
            sense_len: usize::from(hdr.sb_len_wr),
            residual: usize::try_from(hdr.resid).unwrap_or(0),
        })
    }

    fn nvme_admin(&mut self, cmd: &NvmeAdminCommand, data: &mut [u8]) -> Result<u32> {
        use std::os::unix::io::AsRawFd;

        if usize::try_from(cmd.data_len).ok() != Some(data.len()) {
            return Err(Error::invalid_argument(format!(
                "NVMe data_len {} does not match buffer length {}",
                cmd.data_len,
                data.len()
            )));
        }

        let mut raw = sys::NvmePassthruCmd {
            opcode: cmd.opcode,
            nsid: cmd.nsid,
            addr: data.as_mut_ptr() as u64,
            data_len: cmd.data_len,
            cdw10: cmd.cdw10,
            cdw11: cmd.cdw11,
            timeout_ms: self.timeout_ms,
            ..Default::default()
        };

        // SAFETY: addr points at `data`, whose length was checked above.
        let status = unsafe { sys::nvme_admin_cmd(self.file.as_raw_fd(), &mut raw) }
            .map_err(|e| Error::transport(format!("NVMe admin command failed: {e}")))?;

        Ok(u32::try_from(status).unwrap_or(u32::MAX))
    }
}

#[cfg(not(target_os = "linux"))]
impl Passthrough for SgPassthrough<'_> {
    fn scsi(
        &mut self,
        _cdb: &[u8],
        _direction: DataDirection,
        _data: &mut [u8],
        _sense: &mut [u8],
    ) -> Result<ScsiCompletion> {
        Err(Error::transport("SCSI pass-through is only supported on Linux"))
    }

    fn nvme_admin(&mut self, _cmd: &NvmeAdminCommand, _data: &mut [u8]) -> Result<u32> {
        Err(Error::transport("NVMe pass-through is only supported on Linux"))
    }
}
