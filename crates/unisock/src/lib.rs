//! Uniform stream/datagram sockets over always-non-blocking descriptors.
//!
//! `unisock` gives TCP, UDP and SCTP code one portable surface across
//! Unix and Windows. Every descriptor is kept non-blocking at the OS
//! level; "blocking" sockets are emulated by waiting for readiness (with
//! a per-socket millisecond timeout) and retrying, so a blocking read on
//! one thread can never wedge behind a descriptor mode flip elsewhere.
//!
//! Every fallible operation returns [`Result`]; there is no hidden
//! last-error state. [`Error`] carries a portable [`ErrorKind`] plus the
//! native code it was derived from.
//!
//! ```no_run
//! use unisock::{Socket, SocketAddress, SocketFamily, SocketProtocol, SocketType};
//!
//! unisock::init()?;
//! let mut sock = Socket::new(SocketFamily::Ipv4, SocketType::Stream, SocketProtocol::Tcp)?;
//! sock.set_timeout(5_000);
//! sock.connect(&SocketAddress::parse("127.0.0.1", 8080)?)?;
//! sock.send(b"ping")?;
//! # Ok::<(), unisock::Error>(())
//! ```

mod addr;
mod error;
mod socket;
mod wait;

pub use addr::{
    flow_info_supported, ipv6_supported, scope_id_supported, SocketAddress, SocketFamily,
};
pub use error::{Error, ErrorKind, Result};
pub use socket::{Socket, SocketProtocol, SocketType};
pub use wait::{Descriptor, Direction};

use std::sync::OnceLock;

static INIT: OnceLock<std::result::Result<(), Error>> = OnceLock::new();

/// Prepares process-wide socket state. Call once before creating any
/// socket; extra calls are free and return the first outcome.
///
/// On Windows this runs `WSAStartup` for Winsock 2.2. On Unix it ignores
/// `SIGPIPE` so a send to a dead peer reports an error instead of killing
/// the process. (On Linux and the BSDs sends already pass `MSG_NOSIGNAL`;
/// the handler covers the remaining platforms and foreign descriptors.)
pub fn init() -> Result<()> {
    INIT.get_or_init(init_once).clone()
}

#[cfg(unix)]
fn init_once() -> std::result::Result<(), Error> {
    if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(Error::from_io(
            std::io::Error::last_os_error(),
            "ignore SIGPIPE",
        ));
    }
    Ok(())
}

#[cfg(windows)]
fn init_once() -> std::result::Result<(), Error> {
    use windows_sys::Win32::Networking::WinSock::{WSAStartup, WSADATA};

    let mut data: WSADATA = unsafe { std::mem::zeroed() };
    let rc = unsafe { WSAStartup(0x0202, &mut data) };
    if rc != 0 {
        // WSAStartup reports its failure directly in the return value.
        return Err(Error::from_native(rc, "WSAStartup"));
    }
    if data.wVersion != 0x0202 {
        unsafe { windows_sys::Win32::Networking::WinSock::WSACleanup() };
        return Err(Error::new(
            ErrorKind::NotSupported,
            "Winsock 2.2 is unavailable",
        ));
    }
    Ok(())
}

/// Releases process-wide socket state. A no-op on Unix; on Windows it
/// balances the `WSAStartup` performed by [`init`].
pub fn shutdown() {
    #[cfg(windows)]
    if matches!(INIT.get(), Some(Ok(()))) {
        unsafe { windows_sys::Win32::Networking::WinSock::WSACleanup() };
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init().unwrap();
        super::init().unwrap();
    }
}
