//! The datagram transport boundary the dispatcher sends and receives
//! through. Production code plugs in a real UDP socket; tests plug in the
//! in-process [`crate::testing::hub::VirtualHub`] loopback instead, so the
//! whole channel/dispatcher stack runs unmodified under simulation.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no route to {0}")]
    NoRoute(SocketAddr),
}

/// A non-blocking datagram transport: `send_to` fires and forgets (UDP's
/// own contract), `try_recv` is polled once per dispatcher tick.
pub trait Transport: Send {
    fn local_addr(&self) -> SocketAddr;
    fn send_to(&self, to: SocketAddr, data: &[u8]) -> Result<(), TransportError>;
    /// Returns the next queued `(from, data)` pair, if any, without
    /// blocking.
    fn try_recv(&self) -> Option<(SocketAddr, Vec<u8>)>;
}
