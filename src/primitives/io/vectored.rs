#![allow(unsafe_code)]
//! Positioned gather writes for unix targets.

use std::fs::File;
use std::io::{self, ErrorKind, IoSlice};

use smallvec::SmallVec;

use super::MAX_IO_SLICES;

/// Writes `bufs` back to back starting at `off`, retrying short writes.
///
/// Each round hands at most [`MAX_IO_SLICES`] descriptors to the kernel.
pub fn writev_all(file: &File, mut off: u64, bufs: &[IoSlice<'_>]) -> io::Result<()> {
    let mut index = 0usize;
    let mut skip = 0usize;
    loop {
        while index < bufs.len() && bufs[index].len() == skip {
            index += 1;
            skip = 0;
        }
        if index == bufs.len() {
            return Ok(());
        }
        let end = bufs.len().min(index + MAX_IO_SLICES);
        let mut batch: SmallVec<[IoSlice<'_>; 16]> = SmallVec::with_capacity(end - index);
        batch.push(IoSlice::new(&bufs[index][skip..]));
        batch.extend(bufs[index + 1..end].iter().map(|b| IoSlice::new(b)));

        let written = positioned_writev(file, &batch, off)?;
        if written == 0 {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                "pwritev wrote zero bytes",
            ));
        }
        off += written as u64;

        let mut remaining = written;
        while remaining > 0 {
            let avail = bufs[index].len() - skip;
            if remaining >= avail {
                remaining -= avail;
                index += 1;
                skip = 0;
            } else {
                skip += remaining;
                remaining = 0;
            }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn positioned_writev(file: &File, bufs: &[IoSlice<'_>], off: u64) -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let count = bufs.len().min(libc::c_int::MAX as usize) as libc::c_int;
    loop {
        // SAFETY: `IoSlice` is ABI compatible with `iovec` on unix and every
        // slice outlives the call.
        let res = unsafe {
            libc::pwritev(
                fd,
                bufs.as_ptr() as *const libc::iovec,
                count,
                off as libc::off_t,
            )
        };
        if res >= 0 {
            return Ok(res as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn positioned_writev(file: &File, bufs: &[IoSlice<'_>], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    // No pwritev here: write the first descriptor and let the caller advance.
    match bufs.first() {
        Some(first) => file.write_at(first, off),
        None => Ok(0),
    }
}
