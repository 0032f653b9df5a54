#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::types::{Result, VaultError};

/// Exclusive advisory lock held on an open file for as long as the guard lives.
///
/// On unix this is a `flock` lock, which conflicts between separate opens of
/// the same file even inside one process but is shared by duplicated handles.
/// On windows a single byte far past any page data is locked with
/// `LockFileEx`, so the lock never interferes with reads or writes.
pub struct FileLock {
    file: Arc<File>,
    held: bool,
}

impl FileLock {
    /// Attempts to take the exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when another handle already holds it.
    pub fn try_exclusive(file: Arc<File>) -> Result<Option<Self>> {
        if lock_impl(&file).map_err(VaultError::from)? {
            Ok(Some(Self { file, held: true }))
        } else {
            Ok(None)
        }
    }

    /// Releases the lock now and reports a failed unlock to the caller.
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        unlock_impl(&self.file).map_err(VaultError::from)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(err) = unlock_impl(&self.file) {
            warn!(error = %err, "concurrency.file_lock.unlock_failed");
        }
    }
}

fn lock_impl(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_exclusive(file)
    }
    #[cfg(windows)]
    {
        windows::lock_exclusive(file)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = file;
        Err(io::Error::new(
            io::ErrorKind::Other,
            "file locking unsupported on this platform",
        ))
    }
}

fn unlock_impl(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock(file)
    }
    #[cfg(windows)]
    {
        windows::unlock(file)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = file;
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    pub fn lock_exclusive(file: &File) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        loop {
            let res = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
                    return Ok(false)
                }
                _ => return Err(err),
            }
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let res = unsafe { libc::flock(fd, libc::LOCK_UN) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    const LOCK_OFFSET: u64 = u64::MAX - 1;

    fn lock_overlapped() -> OVERLAPPED {
        unsafe {
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = LOCK_OFFSET as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (LOCK_OFFSET >> 32) as u32;
            overlapped
        }
    }

    pub fn lock_exclusive(file: &File) -> io::Result<bool> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped = lock_overlapped();
            let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
            let res = LockFileEx(handle as isize, flags, 0, 1, 0, &mut overlapped);
            if res != 0 {
                Ok(true)
            } else {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(code) if code as u32 == ERROR_LOCK_VIOLATION)
                {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped = lock_overlapped();
            let res = UnlockFileEx(handle as isize, 0, 1, 0, &mut overlapped);
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}
