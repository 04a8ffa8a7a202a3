//! Bounded non-blocking syscalls.
//!
//! One read or write per readiness delivery, never looped: the pump does a
//! single bounded transfer and goes back to sleep until the substrate says
//! the descriptor is ready again. `EAGAIN`, `EWOULDBLOCK` and `EINTR` are
//! folded into [`IoOutcome::WouldBlock`] — both are "come back later", not
//! failures.

use std::io;
use std::os::fd::RawFd;

/// Result of one bounded transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// `n` bytes moved. A write may legally report 0 here; the pump decides
    /// what that means.
    Transferred(usize),
    /// Nothing moved; wait for the next readiness delivery.
    WouldBlock,
    /// The descriptor reported end-of-input (0-byte read).
    Closed,
}

fn retryable(err: &io::Error) -> bool {
    let errno = err.raw_os_error().unwrap_or(0);
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR
}

/// One bounded read into `buf`.
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<IoOutcome> {
    if buf.is_empty() {
        return Ok(IoOutcome::Transferred(0));
    }
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if retryable(&err) {
            return Ok(IoOutcome::WouldBlock);
        }
        return Err(err);
    }
    if res == 0 {
        return Ok(IoOutcome::Closed);
    }
    Ok(IoOutcome::Transferred(res as usize))
}

/// One bounded write from `buf`.
pub fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<IoOutcome> {
    if buf.is_empty() {
        return Ok(IoOutcome::Transferred(0));
    }
    let res = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if retryable(&err) {
            return Ok(IoOutcome::WouldBlock);
        }
        return Err(err);
    }
    Ok(IoOutcome::Transferred(res as usize))
}
