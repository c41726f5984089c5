//! Single-descriptor readiness wait.
//!
//! This is the only blocking point in the crate: every blocking-mode
//! socket operation funnels through [`wait_ready`] before touching the
//! (always non-blocking) descriptor. The implementation differs per
//! platform (`poll(2)` on Unix, `WSAPoll` on Windows) but the observable
//! behavior is identical: block until the descriptor is ready for the
//! requested direction, the millisecond budget runs out, or a real error
//! occurs. Interruption is never surfaced; the remaining budget is
//! recomputed and the wait resumes.

use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind, Result};

/// I/O direction a caller wants the descriptor to become ready for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Readable,
    Writable,
}

/// Raw native socket descriptor.
#[cfg(unix)]
pub type Descriptor = std::os::fd::RawFd;
#[cfg(windows)]
pub type Descriptor = std::os::windows::io::RawSocket;

/// Remaining poll timeout in milliseconds: -1 for "wait forever", 0 when
/// the deadline has already passed.
fn remaining_ms(deadline: Option<Instant>) -> i32 {
    match deadline {
        None => -1,
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            left.as_millis().min(i32::MAX as u128) as i32
        }
    }
}

fn deadline_for(timeout_ms: u32) -> Option<Instant> {
    if timeout_ms == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
    }
}

/// Blocks until `fd` is ready for `direction`. A `timeout_ms` of zero
/// waits indefinitely; a positive value is a hard ceiling after which the
/// call fails with [`ErrorKind::TimedOut`].
#[cfg(unix)]
pub(crate) fn wait_ready(fd: Descriptor, direction: Direction, timeout_ms: u32) -> Result<()> {
    let deadline = deadline_for(timeout_ms);
    let events = match direction {
        Direction::Readable => libc::POLLIN,
        Direction::Writable => libc::POLLOUT,
    };
    loop {
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, remaining_ms(deadline)) };
        if rc > 0 {
            // POLLERR/POLLHUP also count as ready: the next socket call
            // will surface the actual error.
            return Ok(());
        }
        if rc == 0 {
            return Err(Error::new(ErrorKind::TimedOut, "wait for socket readiness"));
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        return Err(Error::from_io(err, "poll"));
    }
}

#[cfg(windows)]
pub(crate) fn wait_ready(fd: Descriptor, direction: Direction, timeout_ms: u32) -> Result<()> {
    use windows_sys::Win32::Networking::WinSock::{
        WSAGetLastError, WSAPoll, POLLRDNORM, POLLWRNORM, SOCKET_ERROR, WSAPOLLFD,
    };

    let deadline = deadline_for(timeout_ms);
    let events = match direction {
        Direction::Readable => POLLRDNORM,
        Direction::Writable => POLLWRNORM,
    };
    loop {
        let mut pfd = WSAPOLLFD {
            fd: fd as usize,
            events,
            revents: 0,
        };
        let rc = unsafe { WSAPoll(&mut pfd, 1, remaining_ms(deadline)) };
        if rc > 0 {
            return Ok(());
        }
        if rc == 0 {
            return Err(Error::new(ErrorKind::TimedOut, "wait for socket readiness"));
        }
        if rc == SOCKET_ERROR {
            let code = unsafe { WSAGetLastError() };
            return Err(Error::from_native(code, "WSAPoll"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn times_out_on_a_quiet_descriptor() {
        // A never-written pipe read end stays unreadable.
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let started = Instant::now();
        let err = wait_ready(fds[0], Direction::Readable, 50).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn reports_readiness_immediately_when_data_is_pending() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let payload = [1u8; 4];
        let written =
            unsafe { libc::write(fds[1], payload.as_ptr() as *const libc::c_void, payload.len()) };
        assert_eq!(written, 4);
        wait_ready(fds[0], Direction::Readable, 1000).unwrap();
        // Write side of a fresh pipe is writable without waiting at all.
        wait_ready(fds[1], Direction::Writable, 0).unwrap();
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
