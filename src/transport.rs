//! Abstract datagram transport.
//!
//! The [`Transport`] trait is the seam between the protocol core and the
//! socket: non-blocking sends and receives addressed by `SocketAddr`. The
//! built-in [`UdpTransport`] wraps a non-blocking `std::net::UdpSocket`; tests
//! substitute in-memory implementations.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Non-blocking datagram transport used by [`Server`](crate::Server) and
/// [`Client`](crate::Client).
pub trait Transport {
    /// Send `buf` to `target`. Never blocks; a would-block condition reports
    /// 0 bytes written and the datagram is dropped (reliable traffic is
    /// covered by retransmission).
    fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram into `buf`. Returns `Ok(None)` when nothing is
    /// pending.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Local address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Default [`Transport`] backed by a non-blocking `std::net::UdpSocket`.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a new non-blocking UDP socket to `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Bind an IPv4 socket on `port` (0 for OS-assigned).
    pub fn bind_port(port: u16) -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Bind the IPv6 wildcard on `port`, serving IPv4-mapped peers where the
    /// platform's dual-stack default allows it.
    pub fn bind_dual(port: u16) -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
    }

    /// Wrap an existing socket; switches it to non-blocking mode.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        match self.socket.send_to(buf, target) {
            Ok(n) => Ok(n),
            // socket buffer full: drop, retransmission covers reliable traffic
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ICMP port-unreachable bleeding through (Windows); the silence
            // timeout cleans the peer up
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(error = %e, "ignoring connection reset on udp receive");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
