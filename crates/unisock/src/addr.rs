//! Portable endpoint addresses and their bit-exact native encodings.
//!
//! A [`SocketAddress`] carries a family, host bits, a port in host byte
//! order, and (IPv6 only) flow-info and scope-id. Conversion to and from
//! the platform's `sockaddr_in`/`sockaddr_in6` layouts is byte-exact: the
//! port crosses the boundary in network byte order while the IPv6
//! flow-info and scope-id fields are copied verbatim, with no byte-order
//! transformation, exactly as the transport layer expects them.

use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::SockAddr;

use crate::error::{Error, ErrorKind, Result};

/// Address family of a socket or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketFamily {
    Ipv4,
    Ipv6,
}

/// Whether this build supports IPv6 endpoints at all.
pub const fn ipv6_supported() -> bool {
    cfg!(any(unix, windows))
}

/// Whether the native IPv6 address structure carries a flow-info field.
/// When this returns `false` the flow-info accessor reads zero and the
/// mutator is a no-op.
pub const fn flow_info_supported() -> bool {
    ipv6_supported()
}

/// Same capability query for the scope-id field.
pub const fn scope_id_supported() -> bool {
    ipv6_supported()
}

/// A parsed or decoded endpoint address.
///
/// Immutable except for the two IPv6 metadata fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    ip: IpAddr,
    port: u16,
    flowinfo: u32,
    scope_id: u32,
}

impl SocketAddress {
    /// Parses a textual address literal. IPv4 dotted-decimal and IPv6
    /// colon-hex forms are accepted; an IPv6 literal may carry a numeric
    /// `%scope` suffix. The family is auto-detected: a `:` anywhere in the
    /// literal selects the IPv6 parse path.
    ///
    /// This is a literal parser, not a resolver. Host names fail with
    /// [`ErrorKind::InvalidArgument`].
    pub fn parse(host: &str, port: u16) -> Result<SocketAddress> {
        if let Some((literal, scope)) = host.split_once('%') {
            let ip: Ipv6Addr = literal
                .parse()
                .map_err(|_| Error::new(ErrorKind::InvalidArgument, "parse address"))?;
            let scope_id: u32 = scope
                .parse()
                .map_err(|_| Error::new(ErrorKind::InvalidArgument, "parse scope id"))?;
            let mut addr = SocketAddress::from_parts(IpAddr::V6(ip), port);
            addr.set_scope_id(scope_id);
            return Ok(addr);
        }
        let ip: IpAddr = if host.contains(':') {
            host.parse::<Ipv6Addr>()
                .map(IpAddr::V6)
                .map_err(|_| Error::new(ErrorKind::InvalidArgument, "parse address"))?
        } else {
            host.parse::<Ipv4Addr>()
                .map(IpAddr::V4)
                .map_err(|_| Error::new(ErrorKind::InvalidArgument, "parse address"))?
        };
        Ok(SocketAddress::from_parts(ip, port))
    }

    /// The wildcard ("any") address for a family: `0.0.0.0` or `::`.
    pub fn any(family: SocketFamily, port: u16) -> SocketAddress {
        let ip = match family {
            SocketFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddress::from_parts(ip, port)
    }

    /// The loopback address for a family: `127.0.0.1` or `::1`.
    pub fn loopback(family: SocketFamily, port: u16) -> SocketAddress {
        let ip = match family {
            SocketFamily::Ipv4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            SocketFamily::Ipv6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        SocketAddress::from_parts(ip, port)
    }

    pub(crate) fn from_parts(ip: IpAddr, port: u16) -> SocketAddress {
        SocketAddress {
            ip,
            port,
            flowinfo: 0,
            scope_id: 0,
        }
    }

    /// Decodes a native `sockaddr_in`/`sockaddr_in6` buffer. The buffer
    /// must be at least as long as the structure its family tag declares.
    #[cfg(unix)]
    pub fn from_native(buf: &[u8]) -> Result<SocketAddress> {
        if buf.len() < mem::size_of::<libc::sa_family_t>() {
            return Err(Error::new(ErrorKind::Failed, "decode native address"));
        }
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let take = buf.len().min(mem::size_of::<libc::sockaddr_storage>());
        unsafe {
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                &mut storage as *mut libc::sockaddr_storage as *mut u8,
                take,
            );
        }
        match storage.ss_family as i32 {
            libc::AF_INET => {
                if buf.len() < mem::size_of::<libc::sockaddr_in>() {
                    return Err(Error::new(ErrorKind::Failed, "decode native address"));
                }
                let sin = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
                Ok(SocketAddress::from_parts(
                    IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))),
                    u16::from_be(sin.sin_port),
                ))
            }
            libc::AF_INET6 => {
                if buf.len() < mem::size_of::<libc::sockaddr_in6>() {
                    return Err(Error::new(ErrorKind::Failed, "decode native address"));
                }
                let sin6 = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in6) };
                Ok(SocketAddress {
                    ip: IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)),
                    port: u16::from_be(sin6.sin6_port),
                    // Carried opaquely, no byte-order conversion.
                    flowinfo: sin6.sin6_flowinfo,
                    scope_id: sin6.sin6_scope_id,
                })
            }
            _ => Err(Error::new(ErrorKind::Failed, "decode native address")),
        }
    }

    #[cfg(windows)]
    pub fn from_native(buf: &[u8]) -> Result<SocketAddress> {
        use windows_sys::Win32::Networking::WinSock::{
            AF_INET, AF_INET6, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE,
        };

        if buf.len() < mem::size_of::<u16>() {
            return Err(Error::new(ErrorKind::Failed, "decode native address"));
        }
        let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
        let take = buf.len().min(mem::size_of::<SOCKADDR_STORAGE>());
        unsafe {
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                &mut storage as *mut SOCKADDR_STORAGE as *mut u8,
                take,
            );
        }
        match storage.ss_family {
            family if family == AF_INET => {
                if buf.len() < mem::size_of::<SOCKADDR_IN>() {
                    return Err(Error::new(ErrorKind::Failed, "decode native address"));
                }
                let sin = unsafe { &*(&storage as *const _ as *const SOCKADDR_IN) };
                let host = unsafe { sin.sin_addr.S_un.S_addr };
                Ok(SocketAddress::from_parts(
                    IpAddr::V4(Ipv4Addr::from(u32::from_be(host))),
                    u16::from_be(sin.sin_port),
                ))
            }
            family if family == AF_INET6 => {
                if buf.len() < mem::size_of::<SOCKADDR_IN6>() {
                    return Err(Error::new(ErrorKind::Failed, "decode native address"));
                }
                let sin6 = unsafe { &*(&storage as *const _ as *const SOCKADDR_IN6) };
                Ok(SocketAddress {
                    ip: IpAddr::V6(Ipv6Addr::from(unsafe { sin6.sin6_addr.u.Byte })),
                    port: u16::from_be(sin6.sin6_port),
                    flowinfo: sin6.sin6_flowinfo,
                    scope_id: unsafe { sin6.Anonymous.sin6_scope_id },
                })
            }
            _ => Err(Error::new(ErrorKind::Failed, "decode native address")),
        }
    }

    /// Writes the native structure for this address into `dest`, returning
    /// the number of bytes used. Fails when `dest` is smaller than
    /// [`native_size`](SocketAddress::native_size).
    pub fn to_native(&self, dest: &mut [u8]) -> Result<usize> {
        let sa = SockAddr::from(self);
        let len = sa.len() as usize;
        if dest.len() < len {
            return Err(Error::new(ErrorKind::Failed, "encode native address"));
        }
        let src = unsafe { std::slice::from_raw_parts(sa.as_ptr() as *const u8, len) };
        dest[..len].copy_from_slice(src);
        Ok(len)
    }

    /// Size of this family's native structure in bytes.
    pub fn native_size(&self) -> usize {
        SockAddr::from(self).len() as usize
    }

    pub fn family(&self) -> SocketFamily {
        match self.ip {
            IpAddr::V4(_) => SocketFamily::Ipv4,
            IpAddr::V6(_) => SocketFamily::Ipv6,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Port in host byte order.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Textual form of the host bits. Formatted on every call, never
    /// cached.
    pub fn host_string(&self) -> String {
        self.ip.to_string()
    }

    /// True for the wildcard address of either family.
    pub fn is_any(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.is_unspecified(),
            IpAddr::V6(v6) => v6.is_unspecified(),
        }
    }

    /// True for loopback addresses. For IPv4 this matches the whole
    /// 127.0.0.0/8 block, not just 127.0.0.1.
    pub fn is_loopback(&self) -> bool {
        match self.ip {
            IpAddr::V4(v4) => v4.octets()[0] == 127,
            IpAddr::V6(v6) => v6.is_loopback(),
        }
    }

    /// IPv6 flow-info, zero for IPv4 addresses or unsupporting platforms.
    pub fn flow_info(&self) -> u32 {
        if !flow_info_supported() || self.family() != SocketFamily::Ipv6 {
            return 0;
        }
        self.flowinfo
    }

    pub fn scope_id(&self) -> u32 {
        if !scope_id_supported() || self.family() != SocketFamily::Ipv6 {
            return 0;
        }
        self.scope_id
    }

    /// No-op for IPv4 addresses and on platforms without the field; check
    /// [`flow_info_supported`] first when the value matters.
    pub fn set_flow_info(&mut self, flowinfo: u32) {
        if !flow_info_supported() || self.family() != SocketFamily::Ipv6 {
            return;
        }
        self.flowinfo = flowinfo;
    }

    pub fn set_scope_id(&mut self, scope_id: u32) {
        if !scope_id_supported() || self.family() != SocketFamily::Ipv6 {
            return;
        }
        self.scope_id = scope_id;
    }

    pub(crate) fn from_sock_addr(sa: &SockAddr) -> Result<SocketAddress> {
        match sa.as_socket() {
            Some(SocketAddr::V4(v4)) => {
                Ok(SocketAddress::from_parts(IpAddr::V4(*v4.ip()), v4.port()))
            }
            Some(SocketAddr::V6(v6)) => Ok(SocketAddress {
                ip: IpAddr::V6(*v6.ip()),
                port: v6.port(),
                flowinfo: v6.flowinfo(),
                scope_id: v6.scope_id(),
            }),
            None => Err(Error::new(ErrorKind::Failed, "decode native address")),
        }
    }
}

impl From<&SocketAddress> for SockAddr {
    fn from(addr: &SocketAddress) -> SockAddr {
        let std_addr = match addr.ip {
            IpAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(v4, addr.port)),
            IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(
                v6,
                addr.port,
                addr.flowinfo,
                addr.scope_id,
            )),
        };
        SockAddr::from(std_addr)
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_literals() {
        let addr = SocketAddress::parse("93.184.216.34", 443).unwrap();
        assert_eq!(addr.family(), SocketFamily::Ipv4);
        assert_eq!(addr.port(), 443);
        assert_eq!(addr.host_string(), "93.184.216.34");
        assert!(!addr.is_any());
        assert!(!addr.is_loopback());
    }

    #[test]
    fn parses_ipv6_literals_with_scope() {
        let addr = SocketAddress::parse("fe80::1%7", 0).unwrap();
        assert_eq!(addr.family(), SocketFamily::Ipv6);
        assert_eq!(addr.scope_id(), 7);
        assert_eq!(addr.flow_info(), 0);
    }

    #[test]
    fn rejects_host_names_and_garbage() {
        assert!(SocketAddress::parse("example.org", 80).is_err());
        assert!(SocketAddress::parse("256.1.1.1", 80).is_err());
        assert!(SocketAddress::parse("fe80::1%eth0", 80).is_err());
        assert!(SocketAddress::parse("", 80).is_err());
    }

    #[test]
    fn any_and_loopback_constructors() {
        assert!(SocketAddress::any(SocketFamily::Ipv4, 0).is_any());
        assert!(SocketAddress::any(SocketFamily::Ipv6, 0).is_any());
        assert!(SocketAddress::loopback(SocketFamily::Ipv4, 0).is_loopback());
        assert!(SocketAddress::loopback(SocketFamily::Ipv6, 0).is_loopback());
        assert!(!SocketAddress::any(SocketFamily::Ipv4, 0).is_loopback());
        assert!(!SocketAddress::loopback(SocketFamily::Ipv4, 0).is_any());
        // The whole 127/8 block counts as loopback.
        assert!(SocketAddress::parse("127.250.0.1", 0).unwrap().is_loopback());
    }

    #[test]
    fn ipv4_native_round_trip() {
        let addr = SocketAddress::parse("192.0.2.7", 8080).unwrap();
        let mut buf = [0u8; 128];
        let len = addr.to_native(&mut buf).unwrap();
        assert_eq!(len, addr.native_size());
        let back = SocketAddress::from_native(&buf[..len]).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn ipv6_native_round_trip_preserves_metadata() {
        let mut addr = SocketAddress::parse("2001:db8::42", 9000).unwrap();
        addr.set_flow_info(0xdead_beef);
        addr.set_scope_id(3);
        let mut buf = [0u8; 128];
        let len = addr.to_native(&mut buf).unwrap();
        let back = SocketAddress::from_native(&buf[..len]).unwrap();
        assert_eq!(back.flow_info(), 0xdead_beef);
        assert_eq!(back.scope_id(), 3);
        assert_eq!(back, addr);
    }

    #[test]
    fn native_port_is_big_endian_on_the_wire() {
        let addr = SocketAddress::parse("127.0.0.1", 0x1234).unwrap();
        let mut buf = [0u8; 64];
        let len = addr.to_native(&mut buf).unwrap();
        // sin_port sits right after the family tag in sockaddr_in.
        let port_off = 2;
        assert!(len >= port_off + 2);
        assert_eq!(&buf[port_off..port_off + 2], &[0x12, 0x34]);
    }

    #[test]
    fn to_native_rejects_short_destination() {
        let addr = SocketAddress::parse("127.0.0.1", 80).unwrap();
        let mut buf = [0u8; 4];
        let err = addr.to_native(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[test]
    fn from_native_rejects_truncated_input() {
        let addr = SocketAddress::parse("2001:db8::1", 80).unwrap();
        let mut buf = [0u8; 128];
        let len = addr.to_native(&mut buf).unwrap();
        // Family tag declares IPv6 but the buffer is shorter than
        // sockaddr_in6.
        let err = SocketAddress::from_native(&buf[..len - 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(SocketAddress::from_native(&[]).is_err());
    }

    #[test]
    fn metadata_fields_ignore_ipv4() {
        let mut addr = SocketAddress::parse("10.0.0.1", 0).unwrap();
        addr.set_flow_info(5);
        addr.set_scope_id(5);
        assert_eq!(addr.flow_info(), 0);
        assert_eq!(addr.scope_id(), 0);
    }

    #[test]
    fn capability_queries_are_consistent() {
        assert_eq!(flow_info_supported(), ipv6_supported());
        assert_eq!(scope_id_supported(), ipv6_supported());
    }
}
