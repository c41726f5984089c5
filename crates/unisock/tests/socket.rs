//! Loopback integration tests for the socket lifecycle and data
//! transfer paths.

use std::time::{Duration, Instant};

use unisock::{
    ErrorKind, Socket, SocketAddress, SocketFamily, SocketProtocol, SocketType,
};

fn tcp_listener() -> Socket {
    unisock::init().unwrap();
    let mut sock = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )
    .unwrap();
    sock.bind(&SocketAddress::loopback(SocketFamily::Ipv4, 0), false)
        .unwrap();
    sock.listen().unwrap();
    sock
}

/// Connects a fresh client to `listener` and returns (client, accepted).
fn tcp_pair(listener: &Socket) -> (Socket, Socket) {
    let target = listener.local_address().unwrap();
    let mut client = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )
    .unwrap();
    client.set_timeout(5_000);
    client.connect(&target).unwrap();
    let accepted = listener.accept().unwrap();
    (client, accepted)
}

fn udp_bound() -> Socket {
    unisock::init().unwrap();
    let sock = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Datagram,
        SocketProtocol::Udp,
    )
    .unwrap();
    sock.bind(&SocketAddress::loopback(SocketFamily::Ipv4, 0), false)
        .unwrap();
    sock
}

#[test]
fn tcp_accept_reports_the_client_address() {
    let listener = tcp_listener();
    let (client, accepted) = tcp_pair(&listener);

    assert!(client.is_connected());
    assert_eq!(
        accepted.remote_address().unwrap(),
        client.local_address().unwrap()
    );
    assert_eq!(
        accepted.local_address().unwrap(),
        client.remote_address().unwrap()
    );
    assert_eq!(accepted.socket_type(), SocketType::Stream);
    assert_eq!(accepted.protocol(), SocketProtocol::Tcp);
}

#[test]
fn tcp_short_reads_preserve_the_byte_stream() {
    let listener = tcp_listener();
    let (client, mut accepted) = tcp_pair(&listener);
    accepted.set_timeout(5_000);

    let payload = b"\x01\x02\x03\x04\x05\x06\x07\x08";
    let mut pending: &[u8] = payload;
    while !pending.is_empty() {
        pending = &pending[client.send(pending).unwrap()..];
    }
    // Let the whole payload land in the receive buffer so the short read
    // below is bounded by the buffer, not by segment arrival.
    std::thread::sleep(Duration::from_millis(50));

    // A smaller buffer yields a read of exactly the buffer size, never an
    // error.
    let mut head = [0u8; 5];
    assert_eq!(accepted.recv(&mut head).unwrap(), 5);
    assert_eq!(&head, &payload[..5]);

    // The remainder stays queued for the next read.
    let mut rest = [0u8; 8];
    assert_eq!(accepted.recv(&mut rest).unwrap(), 3);
    assert_eq!(&rest[..3], &payload[5..]);
}

#[test]
fn recv_honors_the_socket_timeout() {
    let listener = tcp_listener();
    let (_client, mut accepted) = tcp_pair(&listener);
    accepted.set_timeout(50);

    let mut buf = [0u8; 16];
    let started = Instant::now();
    let err = accepted.recv(&mut buf).unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(elapsed >= Duration::from_millis(40), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
}

#[test]
fn nonblocking_recv_surfaces_would_block() {
    let listener = tcp_listener();
    let (_client, mut accepted) = tcp_pair(&listener);
    accepted.set_blocking(false);

    let mut buf = [0u8; 16];
    let err = accepted.recv(&mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WouldBlock);
}

#[test]
fn nonblocking_connect_completes_via_explicit_check() {
    let listener = tcp_listener();
    let target = listener.local_address().unwrap();

    let mut client = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )
    .unwrap();
    client.set_blocking(false);

    match client.connect(&target) {
        // Loopback can finish the handshake inside the call.
        Ok(()) => assert!(client.is_connected()),
        Err(err) => {
            assert!(
                matches!(err.kind(), ErrorKind::InProgress | ErrorKind::WouldBlock),
                "unexpected kind {:?}",
                err.kind()
            );
            assert!(!client.is_connected());
            // The caller drives completion itself in non-blocking mode.
            // Loopback handshakes settle well within this window.
            std::thread::sleep(Duration::from_millis(100));
            client.check_connect_result().unwrap();
        }
    }
    assert!(client.is_connected());

    // The handshake really happened: the listener can accept the peer.
    let accepted = listener.accept().unwrap();
    assert_eq!(
        accepted.remote_address().unwrap(),
        client.local_address().unwrap()
    );
}

#[test]
fn shutdown_of_the_write_half_reads_as_eof() {
    let listener = tcp_listener();
    let (mut client, mut accepted) = tcp_pair(&listener);
    accepted.set_timeout(5_000);

    client.send(b"bye").unwrap();
    client.shutdown(false, true).unwrap();
    // The write half is gone but the client still counts as connected.
    assert!(client.is_connected());

    let mut buf = [0u8; 16];
    let n = accepted.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"bye");
    assert_eq!(accepted.recv(&mut buf).unwrap(), 0);

    client.shutdown(true, true).unwrap();
    assert!(!client.is_connected());
}

#[test]
fn shutdown_of_neither_half_is_a_no_op() {
    let listener = tcp_listener();
    let (mut client, _accepted) = tcp_pair(&listener);
    client.shutdown(false, false).unwrap();
    assert!(client.is_connected());
}

#[test]
fn connecting_to_a_dead_port_is_refused() {
    unisock::init().unwrap();
    // Grab a free port and release it so nothing listens there.
    let dead = {
        let mut probe = tcp_listener();
        let addr = probe.local_address().unwrap();
        probe.close().unwrap();
        addr
    };

    let mut client = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )
    .unwrap();
    client.set_timeout(5_000);
    let err = client.connect(&dead).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    assert!(!client.is_connected());
}

#[test]
fn binding_an_occupied_port_reports_address_in_use() {
    let first = tcp_listener();
    let taken = first.local_address().unwrap();

    let second = Socket::new(
        SocketFamily::Ipv4,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )
    .unwrap();
    let err = second.bind(&taken, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
}

#[test]
fn udp_recv_from_names_the_sender() {
    let sender = udp_bound();
    let mut receiver = udp_bound();
    receiver.set_timeout(5_000);

    let target = receiver.local_address().unwrap();
    assert_eq!(sender.send_to(&target, b"datagram").unwrap(), 8);

    let mut buf = [0u8; 64];
    let (n, from) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"datagram");
    let from = from.expect("UDP reports the source address");
    assert_eq!(from, sender.local_address().unwrap());
}

#[test]
fn udp_connect_pins_the_default_destination() {
    let mut sender = udp_bound();
    let mut receiver = udp_bound();
    receiver.set_timeout(5_000);

    sender.connect(&receiver.local_address().unwrap()).unwrap();
    assert!(sender.is_connected());
    assert_eq!(sender.send(b"pinned").unwrap(), 6);

    let mut buf = [0u8; 64];
    let n = receiver.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"pinned");
}

#[test]
fn closed_socket_is_a_tombstone() {
    let listener = tcp_listener();
    let (mut client, _accepted) = tcp_pair(&listener);

    client.close().unwrap();
    assert!(client.is_closed());
    assert!(!client.is_connected());
    assert!(client.descriptor().is_none());
    // Closing again is still a success.
    client.close().unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(
        client.recv(&mut buf).unwrap_err().kind(),
        ErrorKind::NotAvailable
    );
    assert_eq!(
        client.send(b"x").unwrap_err().kind(),
        ErrorKind::NotAvailable
    );
    assert_eq!(
        client.local_address().unwrap_err().kind(),
        ErrorKind::NotAvailable
    );
}

#[cfg(unix)]
#[test]
fn adopting_a_foreign_descriptor_recovers_its_identity() {
    use std::os::fd::IntoRawFd;

    unisock::init().unwrap();
    let foreign = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let bound = foreign.local_addr().unwrap();

    let adopted = Socket::from_descriptor(foreign.into_raw_fd()).unwrap();
    assert_eq!(adopted.family(), SocketFamily::Ipv4);
    assert_eq!(adopted.socket_type(), SocketType::Datagram);
    assert_eq!(adopted.protocol(), SocketProtocol::Udp);
    assert!(!adopted.is_connected());
    assert_eq!(adopted.local_address().unwrap().port(), bound.port());
}

#[cfg(unix)]
#[test]
fn adopting_a_bad_descriptor_fails() {
    unisock::init().unwrap();
    let err = Socket::from_descriptor(-1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
