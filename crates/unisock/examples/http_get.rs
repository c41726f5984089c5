//! Minimal HTTP/1.0 client: fetch a path from a host:port over TCP and
//! dump the raw response.
//!
//! ```sh
//! cargo run --example http_get -- 93.184.216.34 80 /
//! ```

use unisock::{Socket, SocketAddress, SocketFamily, SocketProtocol, SocketType};

fn main() -> unisock::Result<()> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(80);
    let path = args.next().unwrap_or_else(|| "/".into());

    unisock::init()?;

    let addr = SocketAddress::parse(&host, port)?;
    let mut sock = Socket::new(addr.family(), SocketType::Stream, SocketProtocol::Tcp)?;
    sock.set_timeout(10_000);
    sock.connect(&addr)?;

    let request = format!("GET {path} HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    let mut pending = request.as_bytes();
    while !pending.is_empty() {
        let sent = sock.send(pending)?;
        pending = &pending[sent..];
    }
    // Half-close tells the server the request is complete.
    sock.shutdown(false, true)?;

    let mut buf = [0u8; 4096];
    loop {
        let n = sock.recv(&mut buf)?;
        if n == 0 {
            break;
        }
        print!("{}", String::from_utf8_lossy(&buf[..n]));
    }
    sock.close()
}
