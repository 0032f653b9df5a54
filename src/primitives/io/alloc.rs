#![allow(unsafe_code)]
//! Up-front block reservation for unix targets.

use std::fs::File;
use std::io;

/// Reserves blocks for `[0, len)`, extending the file when it is shorter.
///
/// Holes inside an existing file are filled as well. The file never shrinks.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn allocate(file: &File, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if len == 0 {
        return Ok(());
    }
    let len = libc::off_t::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "allocation length exceeds off_t")
    })?;
    let fd = file.as_raw_fd();
    loop {
        // SAFETY: `fd` is a valid descriptor owned by `file` for the call.
        let res = unsafe { libc::posix_fallocate(fd, 0, len) };
        match res {
            0 => return Ok(()),
            // posix_fallocate returns the error code instead of setting errno.
            libc::EINTR => continue,
            code => return Err(io::Error::from_raw_os_error(code)),
        }
    }
}

/// Extends the file when it is shorter than `len`. No `posix_fallocate` here,
/// so the new range may stay sparse.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn allocate(file: &File, len: u64) -> io::Result<()> {
    if file.metadata()?.len() < len {
        file.set_len(len)?;
    }
    Ok(())
}
