//! Client session: one peer over one owned transport.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::frame::Channel;
use crate::metrics;
use crate::peer::{Peer, PeerEvent, PeerState};
use crate::pool;
use crate::transport::Transport;

/// Session events drained via [`Client::poll_event`].
#[derive(Debug)]
pub enum ClientEvent {
    /// Handshake completed; sends are accepted now
    Connected,
    /// One whole message from the server
    Data(Bytes, Channel),
    /// Session ended, locally or remotely
    Disconnected,
    /// Something worth surfacing
    Error(LinkError),
}

/// Client half of the transport: connects, ticks, sends, disconnects.
pub struct Client<T: Transport> {
    transport: T,
    remote: SocketAddr,
    peer: Option<Peer>,
    recv_buf: Vec<u8>,
    events: VecDeque<ClientEvent>,
}

impl<T: Transport> Client<T> {
    /// Start connecting to `remote`. The greeting goes out with the first
    /// outgoing tick; watch for [`ClientEvent::Connected`].
    pub fn connect(transport: T, remote: SocketAddr, config: Config, now: u32) -> LinkResult<Self> {
        config.validate()?;

        let mut peer = Peer::new_client(&config, now);
        peer.send_hello();
        info!(%remote, "connecting");

        Ok(Self {
            transport,
            remote,
            peer: Some(peer),
            recv_buf: vec![0u8; config.mtu as usize + 1],
            events: VecDeque::new(),
        })
    }

    /// Handshake completed and the session is live.
    pub fn connected(&self) -> bool {
        self.peer
            .as_ref()
            .is_some_and(|peer| peer.state() == PeerState::Authenticated)
    }

    /// One full tick: drain the socket, supervise, flush outbound.
    pub fn tick(&mut self, now: u32) {
        self.tick_incoming(now);
        self.tick_outgoing(now);
    }

    /// Drain the transport into the peer and deliver complete messages.
    pub fn tick_incoming(&mut self, now: u32) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        loop {
            match self.transport.recv_from(&mut self.recv_buf) {
                Ok(Some((len, addr))) => {
                    metrics::global().datagram_received(len);
                    if addr != self.remote {
                        warn!(%addr, "dropping datagram from unexpected sender");
                        continue;
                    }
                    if len > self.recv_buf.len() - 1 {
                        warn!(len, "dropping datagram above mtu");
                        continue;
                    }
                    peer.raw_input(&self.recv_buf[..len], now);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "transport receive failed");
                    break;
                }
            }
        }

        peer.tick_incoming(now);
        self.pump_peer_events();
    }

    /// Flush the peer and push its datagrams to the server.
    pub fn tick_outgoing(&mut self, now: u32) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        peer.tick_outgoing(now);
        while let Some(buf) = peer.poll_output() {
            match self.transport.send_to(&buf, self.remote) {
                Ok(_) => metrics::global().datagram_sent(buf.len()),
                Err(e) => warn!(error = %e, "transport send failed"),
            }
            pool::release_datagram(buf);
        }

        self.pump_peer_events();
    }

    /// Send a message to the server on the chosen channel.
    pub fn send(&mut self, data: &[u8], channel: Channel) -> LinkResult<()> {
        match self.peer.as_mut() {
            Some(peer) => peer.send(data, channel),
            None => Err(LinkError::ConnectionClosed("client is disconnected".into())),
        }
    }

    /// Begin a cooperative shutdown; `Disconnected` fires on the next tick.
    pub fn disconnect(&mut self) {
        if let Some(peer) = self.peer.as_mut() {
            peer.disconnect();
        }
    }

    /// Pop the next event.
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub fn local_addr(&self) -> LinkResult<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Direct peer access for diagnostics and tests.
    pub fn peer_mut(&mut self) -> Option<&mut Peer> {
        self.peer.as_mut()
    }

    // ------------------------------------------------------------------

    fn pump_peer_events(&mut self) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        let mut finished = false;
        while let Some(event) = peer.poll_event() {
            match event {
                PeerEvent::Authenticated => self.events.push_back(ClientEvent::Connected),
                PeerEvent::Data(data, channel) => {
                    self.events.push_back(ClientEvent::Data(data, channel));
                }
                PeerEvent::Disconnected => {
                    self.events.push_back(ClientEvent::Disconnected);
                    finished = true;
                }
                PeerEvent::Error(error) => self.events.push_back(ClientEvent::Error(error)),
            }
        }

        if finished {
            self.peer = None;
            info!("session closed");
        }
    }
}
