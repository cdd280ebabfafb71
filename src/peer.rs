//! Per-remote session state: one KCP engine plus handshake, keepalive,
//! timeout, dead-link, and choke supervision.
//!
//! A peer is sans-I/O like the engine underneath it. The owner feeds raw
//! datagrams via [`Peer::raw_input`], drives the two tick phases, drains
//! outbound datagrams with [`Peer::poll_output`], and drains state changes
//! with [`Peer::poll_event`].

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use kcp_link_core::protocol::time_diff;
use kcp_link_core::{Kcp, KcpConfig, KcpStats, NoDelayConfig};

use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::frame::{
    self, parse_datagram, Channel, Opcode, METADATA_SIZE,
};
use crate::pool;

/// Keepalive cadence on the reliable channel
pub const PING_INTERVAL: u32 = 1000;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Transport-level contact, handshake not yet completed
    Connected,
    /// Handshake completed; data flows
    Authenticated,
    /// Goodbye queued, waiting for the final flush
    Disconnecting,
    /// Terminal; the owner removes the peer
    Disconnected,
}

/// State changes surfaced to the owner, in order of occurrence.
#[derive(Debug)]
pub enum PeerEvent {
    /// Handshake completed
    Authenticated,
    /// One whole application message
    Data(Bytes, Channel),
    /// Terminal state reached; fired exactly once
    Disconnected,
    /// A recoverable or fatal condition worth surfacing
    Error(LinkError),
}

/// Which side of the handshake this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerRole {
    Client,
    Server,
}

/// One remote endpoint multiplexed over a shared or owned socket.
pub struct Peer {
    kcp: Kcp,
    role: PeerRole,
    state: PeerState,
    /// Anti-spoof session cookie; 0 on a client until the server assigns one
    cookie: u32,
    paused: bool,

    last_recv_time: u32,
    last_ping_time: u32,
    timeout: u32,
    queue_disconnect_threshold: usize,

    reliable_max: usize,
    unreliable_max: usize,

    /// scratch for reassembled reliable messages: opcode + payload
    msg_buf: Vec<u8>,

    events: VecDeque<PeerEvent>,
    outputs: VecDeque<BytesMut>,
}

impl Peer {
    fn new(config: &Config, role: PeerRole, cookie: u32, now: u32) -> Self {
        // the engine's datagrams get a frame header prepended, so its mtu
        // shrinks by that much to keep whole datagrams under config.mtu
        let kcp_config = KcpConfig {
            mtu: config.mtu - METADATA_SIZE as u32,
            snd_wnd: config.send_window_size,
            rcv_wnd: config.receive_window_size,
            nodelay: NoDelayConfig {
                nodelay: config.no_delay,
                interval: config.interval,
                resend: config.fast_resend,
                congestion_window: config.congestion_window,
            },
            dead_link: config.max_retransmits,
            ..KcpConfig::default()
        };

        // conv is fixed per session pair; the cookie does the disambiguation
        let kcp = Kcp::new(0, kcp_config);

        let reliable_max = frame::reliable_max_message_size(config.mtu, kcp.rcv_wnd());
        let unreliable_max = frame::unreliable_max_message_size(config.mtu);

        Self {
            kcp,
            role,
            state: PeerState::Connected,
            cookie,
            paused: false,
            last_recv_time: now,
            last_ping_time: now,
            timeout: config.timeout,
            queue_disconnect_threshold: config.queue_disconnect_threshold,
            reliable_max,
            unreliable_max,
            msg_buf: vec![0u8; 1 + reliable_max],
            events: VecDeque::new(),
            outputs: VecDeque::new(),
        }
    }

    /// Client-side peer. The cookie starts at 0 and is adopted from the
    /// server's Hello reply.
    pub fn new_client(config: &Config, now: u32) -> Self {
        Self::new(config, PeerRole::Client, 0, now)
    }

    /// Server-side peer with a freshly assigned cookie.
    pub fn new_server(config: &Config, cookie: u32, now: u32) -> Self {
        Self::new(config, PeerRole::Server, cookie, now)
    }

    // ------------------------------------------------------------------
    // inbound
    // ------------------------------------------------------------------

    /// Feed one raw datagram from the transport.
    pub fn raw_input(&mut self, data: &[u8], now: u32) {
        if self.state == PeerState::Disconnected {
            return;
        }

        let Some(view) = parse_datagram(data) else {
            warn!(len = data.len(), "dropping malformed datagram");
            return;
        };

        // cookie gate: enforced once the session owns one. A server-side peer
        // in Connected is still waiting for the client to learn the cookie.
        let enforce = self.cookie != 0
            && matches!(
                self.state,
                PeerState::Authenticated | PeerState::Disconnecting
            );
        if enforce && view.cookie != self.cookie {
            warn!(
                expected = self.cookie,
                received = view.cookie,
                "dropping datagram with wrong cookie"
            );
            return;
        }

        self.last_recv_time = now;

        match view.channel {
            Channel::Reliable => {
                if let Err(e) = self.kcp.input(view.body) {
                    warn!(error = %e, "reliable input rejected");
                    self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                        e.to_string(),
                    )));
                    self.disconnect();
                }
            }
            Channel::Unreliable => self.on_raw_unreliable(view.body),
        }
    }

    fn on_raw_unreliable(&mut self, body: &[u8]) {
        let (opcode, payload) = match body.split_first() {
            Some((op, rest)) => (*op, rest),
            None => return,
        };

        match Opcode::from_byte(opcode) {
            Some(Opcode::Data) => {
                if self.state != PeerState::Authenticated {
                    trace!("unreliable data before handshake, dropped");
                    return;
                }
                if self.paused || payload.is_empty() {
                    return;
                }
                self.events.push_back(PeerEvent::Data(
                    Bytes::copy_from_slice(payload),
                    Channel::Unreliable,
                ));
            }
            Some(Opcode::Disconnect) => {
                debug!("remote sent goodbye");
                self.disconnect();
            }
            _ => {
                warn!(opcode, "unexpected opcode on unreliable channel");
            }
        }
    }

    // ------------------------------------------------------------------
    // ticks
    // ------------------------------------------------------------------

    /// Evaluate supervision rules and deliver any complete reliable messages.
    pub fn tick_incoming(&mut self, now: u32) {
        match self.state {
            PeerState::Disconnected | PeerState::Disconnecting => return,
            PeerState::Connected | PeerState::Authenticated => {}
        }

        // silence timeout; any valid inbound datagram refreshes the clock
        if time_diff(now, self.last_recv_time) >= self.timeout as i32 {
            self.events.push_back(PeerEvent::Error(LinkError::Timeout(format!(
                "no data received for {} ms",
                self.timeout
            ))));
            self.disconnect();
            return;
        }

        // the engine gave up on a segment
        if self.kcp.state() == -1 {
            self.events.push_back(PeerEvent::Error(LinkError::Timeout(
                "dead link: retransmit limit exceeded".into(),
            )));
            self.disconnect();
            return;
        }

        // runaway queues mean the remote cannot keep up; cut it loose
        let queued = self.kcp.total_queued();
        if queued >= self.queue_disconnect_threshold {
            self.events.push_back(PeerEvent::Error(LinkError::Congestion(format!(
                "queue depth {queued} reached disconnect threshold {}",
                self.queue_disconnect_threshold
            ))));
            self.disconnect();
            return;
        }

        // while paused, messages stay queued inside kcp untouched
        if self.paused {
            return;
        }

        while let Some(size) = self.kcp.peek_size() {
            if size == 0 || size > self.msg_buf.len() {
                self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(format!(
                    "reliable message of {size} bytes outside accepted range"
                ))));
                self.disconnect();
                return;
            }

            let n = match self.kcp.recv(&mut self.msg_buf) {
                Ok(n) => n,
                Err(e) => {
                    self.events.push_back(PeerEvent::Error(LinkError::Unexpected(
                        format!("peeked message failed to read: {e}"),
                    )));
                    self.disconnect();
                    return;
                }
            };

            let opcode = self.msg_buf[0];
            let payload = Bytes::copy_from_slice(&self.msg_buf[1..n]);
            self.on_reliable_message(opcode, payload);

            if self.state == PeerState::Disconnecting || self.state == PeerState::Disconnected {
                return;
            }
        }
    }

    /// Keepalive, engine flush, and goodbye completion.
    pub fn tick_outgoing(&mut self, now: u32) {
        match self.state {
            PeerState::Disconnected => {}
            PeerState::Disconnecting => {
                // let the goodbye drain, then finish exactly once
                self.kcp.update(now);
                self.pump_kcp_outputs();
                self.state = PeerState::Disconnected;
                self.events.push_back(PeerEvent::Disconnected);
                info!("peer disconnected");
            }
            PeerState::Connected | PeerState::Authenticated => {
                if time_diff(now, self.last_ping_time) >= PING_INTERVAL as i32 {
                    let _ = self.send_reliable(Opcode::Ping, &[]);
                    self.last_ping_time = now;
                }
                self.kcp.update(now);
                self.pump_kcp_outputs();
            }
        }
    }

    // ------------------------------------------------------------------
    // outbound
    // ------------------------------------------------------------------

    /// Send an application message on the chosen channel.
    pub fn send(&mut self, data: &[u8], channel: Channel) -> LinkResult<()> {
        if self.state != PeerState::Authenticated {
            return Err(LinkError::ConnectionClosed(
                "send attempted while not connected".into(),
            ));
        }
        if data.is_empty() {
            return Err(LinkError::InvalidSend("empty message".into()));
        }

        match channel {
            Channel::Reliable => {
                if data.len() > self.reliable_max {
                    return Err(LinkError::InvalidSend(format!(
                        "reliable message of {} bytes exceeds maximum {}",
                        data.len(),
                        self.reliable_max
                    )));
                }
                self.send_reliable(Opcode::Data, data)
            }
            Channel::Unreliable => {
                if data.len() > self.unreliable_max {
                    return Err(LinkError::InvalidSend(format!(
                        "unreliable message of {} bytes exceeds maximum {}",
                        data.len(),
                        self.unreliable_max
                    )));
                }
                self.send_unreliable(Opcode::Data, data);
                Ok(())
            }
        }
    }

    /// Begin a cooperative shutdown: queue the goodbye and let the next
    /// outgoing tick flush it and finalize the state.
    pub fn disconnect(&mut self) {
        if matches!(
            self.state,
            PeerState::Disconnecting | PeerState::Disconnected
        ) {
            return;
        }

        let _ = self.send_reliable(Opcode::Disconnect, &[]);
        self.state = PeerState::Disconnecting;
        debug!("peer disconnecting");
    }

    /// Pop the next framed datagram destined for the wire.
    pub fn poll_output(&mut self) -> Option<BytesMut> {
        self.outputs.pop_front()
    }

    /// Pop the next state change or message.
    pub fn poll_event(&mut self) -> Option<PeerEvent> {
        self.events.pop_front()
    }

    // ------------------------------------------------------------------
    // control
    // ------------------------------------------------------------------

    /// Send the handshake greeting carrying the current cookie.
    pub(crate) fn send_hello(&mut self) {
        let cookie = self.cookie;
        if self.send_reliable(Opcode::Hello, &cookie.to_le_bytes()).is_ok() {
            debug!(cookie, "hello queued");
        }
    }

    /// Suspend or resume application delivery. Unpausing resets the timeout
    /// clock so a long pause does not read as remote silence.
    pub fn set_paused(&mut self, paused: bool, now: u32) {
        if self.paused && !paused {
            self.last_recv_time = now;
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Override the session cookie; diagnostics and fault-injection only.
    pub fn set_cookie(&mut self, cookie: u32) {
        self.cookie = cookie;
    }

    /// Largest accepted reliable payload for this configuration
    pub fn reliable_max_message_size(&self) -> usize {
        self.reliable_max
    }

    /// Largest accepted unreliable payload for this configuration
    pub fn unreliable_max_message_size(&self) -> usize {
        self.unreliable_max
    }

    /// Engine counters for monitoring
    pub fn stats(&self) -> KcpStats {
        self.kcp.stats()
    }

    /// Direct engine access for diagnostics and tests
    pub fn kcp(&self) -> &Kcp {
        &self.kcp
    }

    /// Mutable engine access for diagnostics and tests
    pub fn kcp_mut(&mut self) -> &mut Kcp {
        &mut self.kcp
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn on_reliable_message(&mut self, opcode: u8, payload: Bytes) {
        match Opcode::from_byte(opcode) {
            Some(Opcode::Hello) => self.on_hello(payload),
            Some(Opcode::Ping) => {
                // inbound traffic already refreshed the timeout clock
            }
            Some(Opcode::Data) => {
                if self.state != PeerState::Authenticated {
                    warn!("reliable data before handshake");
                    self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                        "data before handshake".into(),
                    )));
                    self.disconnect();
                    return;
                }
                if payload.is_empty() {
                    warn!("empty reliable data message");
                    self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                        "empty data message".into(),
                    )));
                    self.disconnect();
                    return;
                }
                self.events
                    .push_back(PeerEvent::Data(payload, Channel::Reliable));
            }
            Some(Opcode::Disconnect) => {
                debug!("remote sent goodbye");
                self.disconnect();
            }
            None => {
                warn!(opcode, "unknown reliable opcode");
                self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                    format!("unknown opcode {opcode}"),
                )));
                self.disconnect();
            }
        }
    }

    fn on_hello(&mut self, payload: Bytes) {
        if self.state != PeerState::Connected {
            // a second greeting mid-session is either a bug or an attack
            warn!(state = ?self.state, "unexpected hello");
            self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                "hello on established session".into(),
            )));
            self.disconnect();
            return;
        }

        if payload.len() < 4 {
            warn!(len = payload.len(), "hello without cookie");
            self.events.push_back(PeerEvent::Error(LinkError::InvalidReceive(
                "truncated handshake".into(),
            )));
            self.disconnect();
            return;
        }

        match self.role {
            PeerRole::Server => {
                // greet back with the cookie this session was assigned
                self.state = PeerState::Authenticated;
                self.events.push_back(PeerEvent::Authenticated);
                info!(cookie = self.cookie, "handshake complete, greeting client");
                self.send_hello();
            }
            PeerRole::Client => {
                let cookie = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                self.cookie = cookie;
                self.state = PeerState::Authenticated;
                self.events.push_back(PeerEvent::Authenticated);
                info!(cookie, "handshake complete, cookie adopted");
            }
        }
    }

    /// Queue `[opcode][payload]` through the engine.
    fn send_reliable(&mut self, opcode: Opcode, payload: &[u8]) -> LinkResult<()> {
        if 1 + payload.len() > self.msg_buf.len() {
            return Err(LinkError::InvalidSend(format!(
                "reliable message of {} bytes exceeds buffer",
                payload.len()
            )));
        }
        self.msg_buf[0] = opcode as u8;
        self.msg_buf[1..1 + payload.len()].copy_from_slice(payload);

        self.kcp
            .send(&self.msg_buf[..1 + payload.len()])
            .map_err(|e| LinkError::InvalidSend(e.to_string()))
    }

    /// Frame `[channel][cookie][opcode][payload]` straight to the output queue.
    fn send_unreliable(&mut self, opcode: Opcode, payload: &[u8]) {
        let mut buf = pool::acquire_datagram();
        frame::write_frame_header(&mut buf, Channel::Unreliable, self.cookie);
        buf.put_u8(opcode as u8);
        buf.extend_from_slice(payload);
        self.outputs.push_back(buf);
    }

    /// Wrap every engine datagram in the reliable frame header.
    fn pump_kcp_outputs(&mut self) {
        while let Some(pkt) = self.kcp.poll_output() {
            let mut buf = pool::acquire_datagram();
            frame::write_frame_header(&mut buf, Channel::Reliable, self.cookie);
            buf.extend_from_slice(&pkt);
            self.outputs.push_back(buf);
        }
    }
}
