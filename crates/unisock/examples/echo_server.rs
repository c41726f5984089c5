//! TCP echo server: accepts one client at a time and echoes everything
//! it sends until the peer closes.
//!
//! ```sh
//! cargo run --example echo_server -- 8080
//! ```

use unisock::{Socket, SocketAddress, SocketFamily, SocketProtocol, SocketType};

fn serve(client: &Socket) -> unisock::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let n = client.recv(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let sent = client.send(pending)?;
            pending = &pending[sent..];
        }
    }
}

fn main() -> unisock::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    unisock::init()?;

    let mut listener = Socket::new(SocketFamily::Ipv4, SocketType::Stream, SocketProtocol::Tcp)?;
    listener.set_listen_backlog(16);
    listener.bind(&SocketAddress::any(SocketFamily::Ipv4, port), true)?;
    listener.listen()?;
    println!("listening on {}", listener.local_address()?);

    loop {
        let client = listener.accept()?;
        match client.remote_address() {
            Ok(peer) => println!("client connected: {peer}"),
            Err(err) => println!("client connected (peer unknown: {err})"),
        }
        if let Err(err) = serve(&client) {
            eprintln!("client error: {err}");
        }
    }
}
