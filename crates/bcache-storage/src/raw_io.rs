//! Raw device I/O
//!
//! Superblocks are read and written straight from the block device. With
//! `direct_io` set the handle is opened with O_DIRECT on Linux (F_NOCACHE
//! on macOS) so a probe sees what is on the platter, not a stale page
//! cache copy; offsets and lengths must then be [`ALIGNMENT`]-aligned.
//!
//! Handles close when dropped, so every probe path releases its device.

use bcache_common::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Alignment requirement for direct I/O
pub const ALIGNMENT: usize = 4096;

fn io_error(path: &Path, op: &str, e: &std::io::Error) -> Error {
    Error::DiskIo(std::io::Error::new(
        e.kind(),
        format!("{op} {}: {e}", path.display()),
    ))
}

/// Device handle for raw sector I/O
#[derive(Debug)]
pub struct RawFile {
    file: File,
    path: PathBuf,
    read_only: bool,
    direct_io: bool,
}

impl RawFile {
    /// Open a device or image file
    pub fn open(path: impl AsRef<Path>, read_only: bool, direct_io: bool) -> Result<Self> {
        let path = path.as_ref();

        let mut options = OpenOptions::new();
        options.read(true);
        if !read_only {
            options.write(true);
        }

        #[cfg(target_os = "linux")]
        if direct_io {
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options.open(path).map_err(|e| io_error(path, "open", &e))?;

        #[cfg(target_os = "macos")]
        if direct_io {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fcntl on a descriptor we own.
            if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) } == -1 {
                return Err(io_error(
                    path,
                    "set F_NOCACHE on",
                    &std::io::Error::last_os_error(),
                ));
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only,
            direct_io,
        })
    }

    /// Get the device path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying file, for ioctl-based transports
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Size of the device or file in bytes
    pub fn size(&self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| io_error(&self.path, "stat", &e))?;

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::FileTypeExt;
            if meta.file_type().is_block_device() {
                return self.block_device_size();
            }
        }

        Ok(meta.len())
    }

    #[cfg(target_os = "linux")]
    fn block_device_size(&self) -> Result<u64> {
        use std::os::unix::io::AsRawFd;

        nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

        let mut size: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes exactly one u64 through the pointer.
        unsafe { blkgetsize64(self.file.as_raw_fd(), &mut size) }.map_err(|e| {
            io_error(&self.path, "BLKGETSIZE64 on", &std::io::Error::from(e))
        })?;
        Ok(size)
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_alignment(offset, buf.len())?;
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| io_error(&self.path, "read", &e))
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_argument(format!(
                "{} is opened read-only",
                self.path.display()
            )));
        }
        self.check_alignment(offset, buf.len())?;
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| io_error(&self.path, "write", &e))
    }

    /// Sync data to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| io_error(&self.path, "sync", &e))
    }

    fn check_alignment(&self, offset: u64, size: usize) -> Result<()> {
        if !self.direct_io {
            return Ok(());
        }
        if offset % ALIGNMENT as u64 != 0 || size % ALIGNMENT != 0 {
            return Err(Error::invalid_argument(format!(
                "direct I/O at offset {offset}, length {size} is not aligned to {ALIGNMENT}"
            )));
        }
        Ok(())
    }
}

/// Zeroed buffer aligned for O_DIRECT transfers
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    /// Create a buffer of `size` bytes rounded up to [`ALIGNMENT`]
    #[must_use]
    pub fn new(size: usize) -> Self {
        let aligned_size = size.max(1).div_ceil(ALIGNMENT) * ALIGNMENT;
        let Ok(layout) = Layout::from_size_align(aligned_size, ALIGNMENT) else {
            std::alloc::handle_alloc_error(Layout::new::<u8>())
        };
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout)
        };
        Self { ptr, layout }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr owns layout.size() initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr owns layout.size() initialized bytes, borrowed uniquely.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Copy data into the start of the buffer; the rest is left as is
    pub fn copy_from(&mut self, src: &[u8]) {
        let len = src.len().min(self.len());
        self.as_mut_slice()[..len].copy_from_slice(&src[..len]);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}
