//! The production [`Transport`] plug-in: a real, non-blocking UDP socket.
//! `swift-core`'s own test double ([`swift_core::testing::hub`]) is an
//! in-process loopback; this is the thing that actually touches the
//! network.

use std::net::{SocketAddr, UdpSocket};
use swift_core::transport::{Transport, TransportError};

/// Largest datagram we ever attempt to read; bigger than any frame this
/// transport sends (non-DATA frames are capped far below this, DATA frames
/// by the negotiated chunk size).
const RECV_BUF_SIZE: usize = 64 * 1024;

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send_to(&self, to: SocketAddr, data: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(data, to)?;
        Ok(())
    }

    fn try_recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => Some((from, buf[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reports_its_own_local_addr() {
        let t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(t.local_addr().ip().to_string(), "127.0.0.1");
        assert!(t.local_addr().port() > 0);
    }

    #[test]
    fn try_recv_is_none_when_nothing_queued() {
        let t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(t.try_recv().is_none());
    }

    #[test]
    fn send_and_receive_a_datagram_loopback() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.send_to(b.local_addr(), b"hello").unwrap();
        for _ in 0..50 {
            if let Some((from, data)) = b.try_recv() {
                assert_eq!(from, a.local_addr());
                assert_eq!(data, b"hello");
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("datagram never arrived");
    }
}
