use std::{
    fs::File,
    io::{self, IoSlice},
    path::Path,
    sync::Arc,
};

use tracing::trace;

use crate::types::{Result, VaultError};

#[cfg(unix)]
mod alloc;
#[cfg(unix)]
mod vectored;

/// Maximum number of descriptors handed to a single vectored write.
pub const MAX_IO_SLICES: usize = 512;

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Writes bytes to the file at the specified offset from the buffer.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Writes multiple buffers contiguously starting at the specified offset.
    fn writev_at(&self, mut off: u64, bufs: &[IoSlice<'_>]) -> Result<()> {
        for slice in bufs {
            if slice.is_empty() {
                continue;
            }
            self.write_at(off, slice)?;
            off = off
                .checked_add(slice.len() as u64)
                .ok_or(VaultError::Invalid("writev offset overflow"))?;
        }
        Ok(())
    }
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> Result<()>;
    /// Reserves storage for the first `len` bytes, extending the file when it
    /// is shorter. Never shrinks the file.
    fn preallocate(&self, len: u64) -> Result<()>;
}

/// How a file should be opened by [`StdFileIo::open_with`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenMode {
    /// Ask the OS to write every write through to the device before
    /// reporting completion (`O_DSYNC` / `FILE_FLAG_WRITE_THROUGH`).
    pub write_through: bool,
}

#[cfg(unix)]
/// Unix-specific file I/O operations using POSIX APIs.
pub mod stdio_unix {
    use std::{
        fs::{File, OpenOptions},
        io::{self, ErrorKind, IoSlice},
        os::unix::fs::{FileExt, OpenOptionsExt},
        path::Path,
    };

    use crate::types::{Result, VaultError};

    use super::{OpenMode, StdFileIo};

    /// Opens a file in read-write mode with creation support (Unix).
    pub fn open_rw(path: impl AsRef<Path>, mode: OpenMode) -> Result<StdFileIo> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        if mode.write_through {
            options.custom_flags(libc::O_DSYNC);
        }
        let file = options.open(path).map_err(VaultError::from)?;
        Ok(StdFileIo::new(file))
    }

    /// Writes all bytes at offset using Unix pwrite semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    /// Writes every buffer contiguously at offset, preferring `pwritev`.
    pub fn writev_all(file: &File, off: u64, bufs: &[IoSlice<'_>]) -> io::Result<()> {
        super::vectored::writev_all(file, off, bufs)
    }

    /// Reserves blocks for `[0, len)`, preferring `posix_fallocate`.
    pub fn allocate(file: &File, len: u64) -> io::Result<()> {
        super::alloc::allocate(file, len)
    }
}

#[cfg(windows)]
/// Windows-specific file I/O operations using Windows APIs.
pub mod stdio_win {
    use std::{
        fs::{File, OpenOptions},
        io::{self, ErrorKind, IoSlice},
        os::windows::fs::{FileExt, OpenOptionsExt},
        path::Path,
    };

    use windows_sys::Win32::Storage::FileSystem::{FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ};

    use crate::types::{Result, VaultError};

    use super::{OpenMode, StdFileIo};

    /// Opens a file in read-write mode with creation support (Windows).
    pub fn open_rw(path: impl AsRef<Path>, mode: OpenMode) -> Result<StdFileIo> {
        let mut options = OpenOptions::new();
        options
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .share_mode(FILE_SHARE_READ);
        if mode.write_through {
            options.custom_flags(FILE_FLAG_WRITE_THROUGH);
        }
        let file = options.open(path).map_err(VaultError::from)?;
        Ok(StdFileIo::new(file))
    }

    /// Writes all bytes at offset using Windows seek_write semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    /// Writes every buffer contiguously at offset with positioned writes.
    ///
    /// `WriteFileGather` needs sector-aligned unbuffered handles, so buffers
    /// are written one positioned write at a time instead.
    pub fn writev_all(file: &File, mut off: u64, bufs: &[IoSlice<'_>]) -> io::Result<()> {
        for buf in bufs {
            write_all(file, off, buf)?;
            off += buf.len() as u64;
        }
        Ok(())
    }

    /// Extends the file to `len` bytes if it is shorter. NTFS backs the new
    /// range with allocated clusters rather than a sparse hole.
    pub fn allocate(file: &File, len: u64) -> io::Result<()> {
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }
        Ok(())
    }
}

/// Standard file I/O implementation using `Arc<File>`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Creates a new StdFileIo from an existing File handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenMode::default())
    }

    /// Opens or creates a file for read-write access with the given mode.
    pub fn open_with(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        #[cfg(unix)]
        let io = stdio_unix::open_rw(path, mode);
        #[cfg(windows)]
        let io = stdio_win::open_rw(path, mode);
        #[cfg(not(any(unix, windows)))]
        let io = {
            let _ = (path, mode);
            Err(VaultError::Invalid("StdFileIo unsupported on this platform"))
        };
        io
    }

    /// Returns the underlying file handle.
    pub fn file(&self) -> &File {
        &self.inner
    }

    /// Returns a shared reference-counted handle to the same open file.
    pub fn shared_file(&self) -> Arc<File> {
        Arc::clone(&self.inner)
    }

    /// Duplicates the underlying OS handle.
    pub fn try_clone_file(&self) -> Result<File> {
        self.inner.try_clone().map_err(VaultError::from)
    }

    #[cfg(unix)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_unix::write_all(self.file(), off, src)
    }

    #[cfg(windows)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_win::write_all(self.file(), off, src)
    }

    #[cfg(unix)]
    fn writev_all(&self, off: u64, bufs: &[IoSlice<'_>]) -> io::Result<()> {
        stdio_unix::writev_all(self.file(), off, bufs)
    }

    #[cfg(windows)]
    fn writev_all(&self, off: u64, bufs: &[IoSlice<'_>]) -> io::Result<()> {
        stdio_win::writev_all(self.file(), off, bufs)
    }

    #[cfg(unix)]
    fn allocate(&self, len: u64) -> io::Result<()> {
        stdio_unix::allocate(self.file(), len)
    }

    #[cfg(windows)]
    fn allocate(&self, len: u64) -> io::Result<()> {
        stdio_win::allocate(self.file(), len)
    }

    #[cfg(not(any(unix, windows)))]
    fn allocate(&self, _len: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn writev_all(&self, _off: u64, _bufs: &[IoSlice<'_>]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.write_all(off, src).map_err(VaultError::from)
    }

    fn writev_at(&self, off: u64, bufs: &[IoSlice<'_>]) -> Result<()> {
        trace!(off, slices = bufs.len(), "io.writev_at");
        self.writev_all(off, bufs).map_err(VaultError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(VaultError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(VaultError::from)?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file().set_len(len).map_err(VaultError::from)
    }

    fn preallocate(&self, len: u64) -> Result<()> {
        trace!(len, "io.preallocate");
        self.allocate(len).map_err(VaultError::from)
    }
}
