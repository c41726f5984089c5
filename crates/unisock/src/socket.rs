//! Socket lifecycle and data transfer.
//!
//! A [`Socket`] owns exactly one native descriptor which is forced into
//! non-blocking mode at creation and stays that way for its entire life.
//! The `blocking` flag the caller sees is emulated: when it is set, every
//! operation that would block first waits for readiness (with the
//! configured timeout) through [`crate::wait`], then retries the
//! non-blocking call. When it is clear, "would block" outcomes surface to
//! the caller as [`ErrorKind::WouldBlock`].
//!
//! `close` is a tombstone transition: the descriptor is released exactly
//! once and every later operation fails fast with
//! [`ErrorKind::NotAvailable`].

use std::io;
use std::mem::MaybeUninit;
use std::net::Shutdown;

#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawSocket, FromRawSocket, IntoRawSocket};

use socket2::{Domain, Protocol as RawProtocol, SockAddr, Socket as SysSocket, Type as RawType};
use tracing::warn;

use crate::addr::{SocketAddress, SocketFamily};
use crate::error::{Error, ErrorKind, Result};
use crate::wait::{self, Descriptor, Direction};

/// SOMAXCONN is as low as 5 on some older systems; use that as the
/// conservative default backlog.
const DEFAULT_LISTEN_BACKLOG: i32 = 5;

/// IANA protocol number for SCTP; not every libc exposes a constant.
const IPPROTO_SCTP: i32 = 132;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd"))]
const DEFAULT_SEND_FLAGS: i32 = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd"
)))]
const DEFAULT_SEND_FLAGS: i32 = 0;

/// Communication style of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Datagram,
    SeqPacket,
}

/// Transport protocol selector. `Default` lets the OS pick the canonical
/// protocol for the family/type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketProtocol {
    Default,
    Tcp,
    Udp,
    Sctp,
}

/// A portable socket: one owned native descriptor plus cached metadata.
///
/// Not `Clone`: exactly one `Socket` owns a descriptor. The only way to
/// produce a second `Socket` from existing kernel state is
/// [`Socket::from_descriptor`], which takes ownership of its argument.
#[derive(Debug)]
pub struct Socket {
    inner: Option<SysSocket>,
    family: SocketFamily,
    kind: SocketType,
    protocol: SocketProtocol,
    backlog: i32,
    timeout_ms: u32,
    blocking: bool,
    keepalive: bool,
    connected: bool,
    listening: bool,
}

fn raw_descriptor(sock: &SysSocket) -> Descriptor {
    #[cfg(unix)]
    {
        sock.as_raw_fd()
    }
    #[cfg(windows)]
    {
        sock.as_raw_socket()
    }
}

fn is_would_block(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(err.raw_os_error(), Some(code) if ErrorKind::from_native(code) == ErrorKind::WouldBlock)
}

fn is_interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// `recv` only ever writes initialized bytes into the buffer, so viewing
/// an initialized `&mut [u8]` as `&mut [MaybeUninit<u8>]` is sound here.
fn recv_buf(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

impl Socket {
    /// Allocates a fresh descriptor for the given family/type/protocol and
    /// forces it into non-blocking mode. The socket starts out in emulated
    /// blocking mode with an unlimited timeout and the default backlog.
    pub fn new(
        family: SocketFamily,
        kind: SocketType,
        protocol: SocketProtocol,
    ) -> Result<Socket> {
        let domain = match family {
            SocketFamily::Ipv4 => Domain::IPV4,
            SocketFamily::Ipv6 => Domain::IPV6,
        };
        let raw_type = match kind {
            SocketType::Stream => RawType::STREAM,
            SocketType::Datagram => RawType::DGRAM,
            #[cfg(unix)]
            SocketType::SeqPacket => RawType::from(libc::SOCK_SEQPACKET),
            // Winsock's SOCK_SEQPACKET value.
            #[cfg(windows)]
            SocketType::SeqPacket => RawType::from(5),
        };
        let raw_protocol = match protocol {
            SocketProtocol::Default => None,
            SocketProtocol::Tcp => Some(RawProtocol::TCP),
            SocketProtocol::Udp => Some(RawProtocol::UDP),
            SocketProtocol::Sctp => Some(RawProtocol::from(IPPROTO_SCTP)),
        };

        // socket2 requests close-on-exec (and its Windows equivalent) at
        // allocation time.
        let sock = SysSocket::new(domain, raw_type, raw_protocol)
            .map_err(|err| Error::from_io(err, "create socket"))?;
        sock.set_nonblocking(true)
            .map_err(|err| Error::from_io(err, "set non-blocking mode"))?;

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        if let Err(err) = sock.set_nosigpipe(true) {
            warn!(error = %err, "failed to set SO_NOSIGPIPE on new socket");
        }

        Ok(Socket {
            inner: Some(sock),
            family,
            kind,
            protocol,
            backlog: DEFAULT_LISTEN_BACKLOG,
            timeout_ms: 0,
            blocking: true,
            keepalive: false,
            connected: false,
            listening: false,
        })
    }

    /// Adopts an already-open descriptor (typically one handed over by a
    /// foreign accept loop), deriving family, type, protocol, keepalive
    /// and connected state by introspecting it. Takes ownership: the
    /// descriptor is closed when adoption fails and when the returned
    /// socket is closed or dropped.
    pub fn from_descriptor(descriptor: Descriptor) -> Result<Socket> {
        #[cfg(unix)]
        {
            if descriptor < 0 {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "adopt descriptor",
                ));
            }
        }
        let sock = unsafe {
            #[cfg(unix)]
            {
                SysSocket::from_raw_fd(descriptor)
            }
            #[cfg(windows)]
            {
                SysSocket::from_raw_socket(descriptor)
            }
        };
        Socket::from_sys(sock)
    }

    fn from_sys(sock: SysSocket) -> Result<Socket> {
        let raw_type = sock
            .r#type()
            .map_err(|err| Error::from_io(err, "query socket type"))?;
        let kind = match raw_type {
            RawType::STREAM => SocketType::Stream,
            RawType::DGRAM => SocketType::Datagram,
            #[cfg(unix)]
            t if t == RawType::from(libc::SOCK_SEQPACKET) => SocketType::SeqPacket,
            #[cfg(windows)]
            t if t == RawType::from(5) => SocketType::SeqPacket,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "adopt descriptor of unknown type",
                ))
            }
        };

        let local = sock
            .local_addr()
            .map_err(|err| Error::from_io(err, "query socket address"))?;
        let family = match local.domain() {
            Domain::IPV4 => SocketFamily::Ipv4,
            Domain::IPV6 => SocketFamily::Ipv6,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "adopt descriptor of unknown family",
                ))
            }
        };

        let protocol = match kind {
            SocketType::Stream => SocketProtocol::Tcp,
            SocketType::Datagram => SocketProtocol::Udp,
            SocketType::SeqPacket => SocketProtocol::Sctp,
        };

        let connected = sock.peer_addr().is_ok();
        // Unreadable keepalive state means "not supported here"; assume
        // off.
        let keepalive = sock.keepalive().unwrap_or(false);

        sock.set_nonblocking(true)
            .map_err(|err| Error::from_io(err, "set non-blocking mode"))?;

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        if let Err(err) = sock.set_nosigpipe(true) {
            warn!(error = %err, "failed to set SO_NOSIGPIPE on adopted socket");
        }

        Ok(Socket {
            inner: Some(sock),
            family,
            kind,
            protocol,
            backlog: DEFAULT_LISTEN_BACKLOG,
            timeout_ms: 0,
            blocking: true,
            keepalive,
            connected,
            listening: false,
        })
    }

    fn require_open(&self) -> Result<&SysSocket> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotAvailable, "socket is already closed"))
    }

    fn wait_ready(&self, direction: Direction) -> Result<()> {
        let sock = self.require_open()?;
        wait::wait_ready(raw_descriptor(sock), direction, self.timeout_ms)
    }

    /// Attaches a local address. Address reuse is applied best-effort when
    /// requested: a failure to set the option is logged, never fatal.
    pub fn bind(&self, address: &SocketAddress, allow_reuse: bool) -> Result<()> {
        let sock = self.require_open()?;

        // Windows allows rebinding over an active TCP connection with
        // SO_REUSEADDR, so the option is restricted to datagram sockets
        // there.
        #[cfg(windows)]
        let reuse_addr = allow_reuse && self.kind == SocketType::Datagram;
        #[cfg(not(windows))]
        let reuse_addr = allow_reuse;
        if let Err(err) = sock.set_reuse_address(reuse_addr) {
            warn!(error = %err, "failed to set SO_REUSEADDR before bind");
        }

        #[cfg(all(
            unix,
            not(any(target_os = "solaris", target_os = "illumos"))
        ))]
        {
            let reuse_port = allow_reuse && self.kind == SocketType::Datagram;
            if let Err(err) = sock.set_reuse_port(reuse_port) {
                warn!(error = %err, "failed to set SO_REUSEPORT before bind");
            }
        }

        let sa = SockAddr::from(address);
        sock.bind(&sa).map_err(|err| Error::from_io(err, "bind"))
    }

    /// Establishes a remote peer. For connection-oriented sockets this
    /// performs the handshake; for datagram sockets it pins the default
    /// destination for unaddressed sends.
    ///
    /// In blocking mode an in-progress connect waits for writability (with
    /// the socket timeout) and then verifies completion through the
    /// pending socket error. In non-blocking mode the caller gets
    /// [`ErrorKind::WouldBlock`]/[`ErrorKind::InProgress`] back and is
    /// expected to drive [`Socket::check_connect_result`] itself.
    pub fn connect(&mut self, address: &SocketAddress) -> Result<()> {
        let sock = self.require_open()?;
        let sa = SockAddr::from(address);

        // Only the initial attempt retries on interruption; later stages
        // have their own retry discipline.
        let attempt = loop {
            match sock.connect(&sa) {
                Ok(()) => break Ok(()),
                Err(err) if is_interrupted(&err) => continue,
                Err(err) => break Err(err),
            }
        };

        let err = match attempt {
            Ok(()) => {
                self.connected = true;
                return Ok(());
            }
            Err(err) => err,
        };

        let mapped = Error::from_io(err, "connect");
        match mapped.kind() {
            ErrorKind::WouldBlock | ErrorKind::InProgress if self.blocking => {
                self.wait_ready(Direction::Writable)?;
                self.check_connect_result()
            }
            _ => Err(mapped),
        }
    }

    /// Completes a non-blocking connect: queries the pending socket error
    /// and flips the connected flag accordingly. `Ok(())` means the
    /// handshake finished successfully.
    pub fn check_connect_result(&mut self) -> Result<()> {
        let sock = self.require_open()?;
        match sock.take_error() {
            Ok(None) => {
                self.connected = true;
                Ok(())
            }
            Ok(Some(err)) => {
                self.connected = false;
                Err(Error::from_io(err, "connect"))
            }
            Err(err) => Err(Error::from_io(err, "query connect result")),
        }
    }

    /// Starts listening with the configured backlog. Valid once per
    /// socket; the backlog is frozen afterwards.
    pub fn listen(&mut self) -> Result<()> {
        let sock = self.require_open()?;
        if self.listening {
            return Err(Error::new(ErrorKind::InvalidArgument, "already listening"));
        }
        sock.listen(self.backlog)
            .map_err(|err| Error::from_io(err, "listen"))?;
        self.listening = true;
        Ok(())
    }

    /// Accepts one pending connection, wrapping the new descriptor in a
    /// `Socket` that inherits this socket's protocol. In blocking mode the
    /// call waits for readability (bounded by the timeout) before each
    /// attempt.
    pub fn accept(&self) -> Result<Socket> {
        let accepted = loop {
            let sock = self.require_open()?;
            if self.blocking {
                self.wait_ready(Direction::Readable)?;
            }
            match sock.accept() {
                Ok((accepted, _peer)) => break accepted,
                Err(err) if is_interrupted(&err) => continue,
                Err(err) if is_would_block(&err) && self.blocking => continue,
                Err(err) => return Err(Error::from_io(err, "accept")),
            }
        };
        // If wrapping fails, dropping `accepted` closes the raw
        // descriptor instead of leaking it.
        let mut wrapped = Socket::from_sys(accepted)?;
        wrapped.protocol = self.protocol;
        Ok(wrapped)
    }

    /// Receives from the implicit peer. Returns the number of bytes read,
    /// which may be shorter than the buffer.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let sock = self.require_open()?;
        loop {
            if self.blocking {
                self.wait_ready(Direction::Readable)?;
            }
            match sock.recv(recv_buf(buf)) {
                Ok(n) => return Ok(n),
                Err(err) if is_interrupted(&err) => continue,
                // Readiness was already confirmed; this absorbs spurious
                // wake-ups.
                Err(err) if is_would_block(&err) && self.blocking => continue,
                Err(err) => return Err(Error::from_io(err, "recv")),
            }
        }
    }

    /// Receives one datagram (or stream chunk), also reporting the sender
    /// when the transport provides one.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddress>)> {
        let sock = self.require_open()?;
        loop {
            if self.blocking {
                self.wait_ready(Direction::Readable)?;
            }
            match sock.recv_from(recv_buf(buf)) {
                Ok((n, peer)) => {
                    let sender = SocketAddress::from_sock_addr(&peer).ok();
                    return Ok((n, sender));
                }
                Err(err) if is_interrupted(&err) => continue,
                Err(err) if is_would_block(&err) && self.blocking => continue,
                Err(err) => return Err(Error::from_io(err, "recvfrom")),
            }
        }
    }

    /// Sends to the implicit peer established by [`Socket::connect`].
    /// Returns the number of bytes actually queued; callers must handle
    /// short writes.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        let sock = self.require_open()?;
        loop {
            if self.blocking {
                self.wait_ready(Direction::Writable)?;
            }
            match sock.send_with_flags(buf, DEFAULT_SEND_FLAGS) {
                Ok(n) => return Ok(n),
                Err(err) if is_interrupted(&err) => continue,
                Err(err) if is_would_block(&err) && self.blocking => continue,
                Err(err) => return Err(Error::from_io(err, "send")),
            }
        }
    }

    /// Sends one datagram to an explicit destination.
    pub fn send_to(&self, address: &SocketAddress, buf: &[u8]) -> Result<usize> {
        let sock = self.require_open()?;
        let sa = SockAddr::from(address);
        loop {
            if self.blocking {
                self.wait_ready(Direction::Writable)?;
            }
            match sock.send_to_with_flags(buf, &sa, DEFAULT_SEND_FLAGS) {
                Ok(n) => return Ok(n),
                Err(err) if is_interrupted(&err) => continue,
                Err(err) if is_would_block(&err) && self.blocking => continue,
                Err(err) => return Err(Error::from_io(err, "sendto")),
            }
        }
    }

    /// Disables the read and/or write half of an established connection.
    /// Requesting neither half is a no-op success; requesting both marks
    /// the socket disconnected.
    pub fn shutdown(&mut self, read: bool, write: bool) -> Result<()> {
        let sock = self.require_open()?;
        if !read && !write {
            return Ok(());
        }
        let how = match (read, write) {
            (true, true) => Shutdown::Both,
            (true, false) => Shutdown::Read,
            (false, _) => Shutdown::Write,
        };
        sock.shutdown(how)
            .map_err(|err| Error::from_io(err, "shutdown"))?;
        if read && write {
            self.connected = false;
        }
        Ok(())
    }

    /// Closes the descriptor. Idempotent: closing an already-closed socket
    /// succeeds trivially. On failure the descriptor is retained and the
    /// socket state is unchanged.
    pub fn close(&mut self) -> Result<()> {
        let Some(sock) = self.inner.take() else {
            return Ok(());
        };
        #[cfg(unix)]
        let raw = sock.into_raw_fd();
        #[cfg(windows)]
        let raw = sock.into_raw_socket();
        match close_descriptor(raw) {
            Ok(()) => {
                self.connected = false;
                self.listening = false;
                Ok(())
            }
            Err(err) => {
                self.inner = Some(unsafe {
                    #[cfg(unix)]
                    {
                        SysSocket::from_raw_fd(raw)
                    }
                    #[cfg(windows)]
                    {
                        SysSocket::from_raw_socket(raw)
                    }
                });
                Err(Error::from_io(err, "close"))
            }
        }
    }

    /// Sets the kernel buffer size for one transfer direction
    /// (`SO_RCVBUF` for [`Direction::Readable`], `SO_SNDBUF` for
    /// [`Direction::Writable`]).
    pub fn set_buffer_size(&self, direction: Direction, size: usize) -> Result<()> {
        let sock = self.require_open()?;
        match direction {
            Direction::Readable => sock
                .set_recv_buffer_size(size)
                .map_err(|err| Error::from_io(err, "set receive buffer size")),
            Direction::Writable => sock
                .set_send_buffer_size(size)
                .map_err(|err| Error::from_io(err, "set send buffer size")),
        }
    }

    /// Best-effort keepalive toggle; failures are logged, the cached flag
    /// only changes when the option actually took effect.
    pub fn set_keepalive(&mut self, keepalive: bool) {
        if self.keepalive == keepalive {
            return;
        }
        let Some(sock) = self.inner.as_ref() else {
            warn!("ignoring keepalive change on closed socket");
            return;
        };
        match sock.set_keepalive(keepalive) {
            Ok(()) => self.keepalive = keepalive,
            Err(err) => warn!(error = %err, "failed to set SO_KEEPALIVE"),
        }
    }

    /// Toggles emulated blocking mode. The descriptor itself always stays
    /// non-blocking.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// Adjusts the backlog used by a future [`Socket::listen`]. Ignored
    /// once the socket is listening: the backlog is frozen then.
    pub fn set_listen_backlog(&mut self, backlog: i32) {
        if self.listening {
            return;
        }
        self.backlog = backlog;
    }

    /// Sets the readiness-wait timeout in milliseconds, clamped to zero.
    /// Zero means wait forever.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.timeout_ms = timeout_ms.max(0) as u32;
    }

    /// The raw native descriptor, or `None` once closed.
    pub fn descriptor(&self) -> Option<Descriptor> {
        self.inner.as_ref().map(raw_descriptor)
    }

    pub fn family(&self) -> SocketFamily {
        self.family
    }

    pub fn socket_type(&self) -> SocketType {
        self.kind
    }

    pub fn protocol(&self) -> SocketProtocol {
        self.protocol
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn listen_backlog(&self) -> i32 {
        self.backlog
    }

    /// Readiness-wait timeout in milliseconds; zero means unbounded.
    pub fn timeout(&self) -> u32 {
        self.timeout_ms
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// The locally bound address.
    pub fn local_address(&self) -> Result<SocketAddress> {
        let sock = self.require_open()?;
        let sa = sock
            .local_addr()
            .map_err(|err| Error::from_io(err, "getsockname"))?;
        SocketAddress::from_sock_addr(&sa)
    }

    /// The connected peer's address.
    pub fn remote_address(&self) -> Result<SocketAddress> {
        let sock = self.require_open()?;
        let sa = sock
            .peer_addr()
            .map_err(|err| Error::from_io(err, "getpeername"))?;
        SocketAddress::from_sock_addr(&sa)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // Free semantics: close if still open, ignoring the result.
        let _ = self.close();
    }
}

#[cfg(unix)]
fn close_descriptor(fd: std::os::fd::RawFd) -> io::Result<()> {
    // Never retried on EINTR: after close(2) returns, the descriptor
    // state is undefined on several systems and a retry can close an
    // unrelated descriptor opened by another thread.
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn close_descriptor(raw: std::os::windows::io::RawSocket) -> io::Result<()> {
    use windows_sys::Win32::Networking::WinSock::{closesocket, WSAGetLastError, SOCKET_ERROR};

    if unsafe { closesocket(raw as usize) } == SOCKET_ERROR {
        Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }))
    } else {
        Ok(())
    }
}
