//! Server multiplexer: many peers over one datagram transport.
//!
//! Inbound datagrams demultiplex by source address. An unknown address gets a
//! provisional peer with a fresh cookie; only a valid handshake earns a slot
//! in the connection map, so spoof floods and stale clients never allocate
//! lasting state.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::frame::Channel;
use crate::metrics;
use crate::peer::{Peer, PeerEvent, PeerState};
use crate::pool;
use crate::transport::{Transport, UdpTransport};

/// Opaque, stable handle for one remote endpoint.
pub type ConnectionId = u64;

/// Stable per-process hash of a remote address.
pub fn connection_id(addr: &SocketAddr) -> ConnectionId {
    let mut hasher = FxHasher::default();
    addr.hash(&mut hasher);
    hasher.finish()
}

/// Connection lifecycle and traffic events, drained via
/// [`Server::poll_event`].
#[derive(Debug)]
pub enum ServerEvent {
    /// Handshake completed; the id is now valid for sends
    Connected(ConnectionId),
    /// One whole message from this connection
    Data(ConnectionId, Bytes, Channel),
    /// Connection ended; the id is gone
    Disconnected(ConnectionId),
    /// Something worth surfacing happened on this connection
    Error(ConnectionId, LinkError),
}

struct Connection {
    peer: Peer,
    addr: SocketAddr,
}

/// Datagram server multiplexing authenticated peers over one transport.
pub struct Server<T: Transport> {
    transport: T,
    config: Config,
    connections: FxHashMap<ConnectionId, Connection>,
    /// ids collected mid-iteration, removed after the event pump
    removals: Vec<ConnectionId>,
    /// one byte larger than mtu so oversized datagrams are detectable
    recv_buf: Vec<u8>,
    events: VecDeque<ServerEvent>,
}

impl Server<UdpTransport> {
    /// Bind a UDP socket on `port` and serve on it. `config.dual_mode`
    /// selects the IPv6 wildcard with IPv4-mapped support.
    pub fn bind(port: u16, config: Config) -> LinkResult<Self> {
        let transport = if config.dual_mode {
            UdpTransport::bind_dual(port)?
        } else {
            UdpTransport::bind_port(port)?
        };
        Self::new(transport, config)
    }
}

impl<T: Transport> Server<T> {
    /// Wrap a bound transport. The caller chose the bind address (and dual
    /// mode) when constructing the transport.
    pub fn new(transport: T, config: Config) -> LinkResult<Self> {
        config.validate()?;
        let recv_buf = vec![0u8; config.mtu as usize + 1];
        if let Ok(addr) = transport.local_addr() {
            info!(%addr, "server ready");
        }
        Ok(Self {
            transport,
            config,
            connections: FxHashMap::default(),
            removals: Vec::new(),
            recv_buf,
            events: VecDeque::new(),
        })
    }

    /// One full tick: drain the socket, supervise peers, flush outbound.
    pub fn tick(&mut self, now: u32) {
        self.tick_incoming(now);
        self.tick_outgoing(now);
    }

    /// Drain the transport and feed every datagram to its peer, creating
    /// provisional peers for unknown addresses.
    pub fn tick_incoming(&mut self, now: u32) {
        loop {
            match self.transport.recv_from(&mut self.recv_buf) {
                Ok(Some((len, addr))) => {
                    metrics::global().datagram_received(len);

                    if len > self.config.mtu as usize {
                        warn!(%addr, len, "dropping datagram above mtu");
                        continue;
                    }

                    let id = connection_id(&addr);
                    if let Some(conn) = self.connections.get_mut(&id) {
                        conn.peer.raw_input(&self.recv_buf[..len], now);
                    } else {
                        let datagram = self.recv_buf[..len].to_vec();
                        self.accept_new(id, addr, &datagram, now);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "transport receive failed");
                    break;
                }
            }
        }

        for conn in self.connections.values_mut() {
            conn.peer.tick_incoming(now);
        }

        self.pump_peer_events();
    }

    /// Flush every peer and push its datagrams to the transport.
    pub fn tick_outgoing(&mut self, now: u32) {
        for conn in self.connections.values_mut() {
            conn.peer.tick_outgoing(now);
            while let Some(buf) = conn.peer.poll_output() {
                match self.transport.send_to(&buf, conn.addr) {
                    Ok(_) => metrics::global().datagram_sent(buf.len()),
                    Err(e) => warn!(addr = %conn.addr, error = %e, "transport send failed"),
                }
                pool::release_datagram(buf);
            }
        }

        self.pump_peer_events();
    }

    /// Send to one connection.
    pub fn send(&mut self, id: ConnectionId, data: &[u8], channel: Channel) -> LinkResult<()> {
        match self.connections.get_mut(&id) {
            Some(conn) => conn.peer.send(data, channel),
            None => Err(LinkError::ConnectionClosed(format!(
                "no connection with id {id}"
            ))),
        }
    }

    /// Begin a cooperative shutdown of one connection; the goodbye and the
    /// `Disconnected` event follow on the next outgoing tick.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.peer.disconnect();
        }
    }

    /// Remote address behind a connection id.
    pub fn address_of(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|conn| conn.addr)
    }

    /// Live connection count (authenticated peers only).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Pop the next event.
    pub fn poll_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Direct peer access for diagnostics and tests.
    pub fn peer_mut(&mut self, id: ConnectionId) -> Option<&mut Peer> {
        self.connections.get_mut(&id).map(|conn| &mut conn.peer)
    }

    // ------------------------------------------------------------------

    /// First datagram from an unknown address: run it through a provisional
    /// peer and keep the peer only if the handshake checks out.
    fn accept_new(&mut self, id: ConnectionId, addr: SocketAddr, datagram: &[u8], now: u32) {
        let cookie = loop {
            let cookie = rand::random::<u32>();
            if cookie != 0 {
                break cookie;
            }
        };

        let mut peer = Peer::new_server(&self.config, cookie, now);
        peer.raw_input(datagram, now);
        peer.tick_incoming(now);

        if peer.state() == PeerState::Authenticated {
            info!(id, %addr, "connection authenticated");
            metrics::global().connection_accepted();
            self.connections.insert(id, Connection { peer, addr });
        } else {
            // spoofed, stale, or random noise: no state survives
            debug!(%addr, "discarding unauthenticated first contact");
            metrics::global().connection_rejected();
        }
    }

    /// Translate queued peer events into server events and apply deferred
    /// removals once no iteration is in flight.
    fn pump_peer_events(&mut self) {
        for (id, conn) in self.connections.iter_mut() {
            while let Some(event) = conn.peer.poll_event() {
                match event {
                    PeerEvent::Authenticated => {
                        self.events.push_back(ServerEvent::Connected(*id));
                    }
                    PeerEvent::Data(data, channel) => {
                        self.events.push_back(ServerEvent::Data(*id, data, channel));
                    }
                    PeerEvent::Disconnected => {
                        self.events.push_back(ServerEvent::Disconnected(*id));
                        self.removals.push(*id);
                    }
                    PeerEvent::Error(error) => {
                        self.events.push_back(ServerEvent::Error(*id, error));
                    }
                }
            }
        }

        for id in self.removals.drain(..) {
            if self.connections.remove(&id).is_some() {
                metrics::global().connection_closed();
                debug!(id, "connection removed");
            }
        }
    }
}
