//! # kcp-link: reliable-over-UDP transport
//!
//! A KCP-based message transport: ordered reliable delivery and a
//! fire-and-forget unreliable channel, multiplexed over a single datagram
//! socket with a cookie-authenticated handshake and keepalive supervision.
//!
//! ## Design
//!
//! The whole core is single-threaded and sans-I/O. Nothing here spawns
//! threads, blocks, or reads a clock; the owner polls the socket, supplies
//! millisecond timestamps to the tick methods, and drains queued events:
//!
//! ```text
//! ┌─────────────────────────┐
//! │  Server / Client        │  demux by address, events, transport pump
//! ├─────────────────────────┤
//! │  Peer                   │  handshake, cookie, ping, timeout, choke
//! ├─────────────────────────┤
//! │  Kcp (kcp-link-core)    │  ARQ, windows, RTO, fast retransmit
//! ├─────────────────────────┤
//! │  Transport              │  non-blocking datagram seam (UDP built in)
//! └─────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kcp_link::{Channel, Client, Config, ClientEvent, UdpTransport, now_ms};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = UdpTransport::bind("0.0.0.0:0".parse()?)?;
//!     let mut client = Client::connect(
//!         transport,
//!         "127.0.0.1:7777".parse()?,
//!         Config::default(),
//!         now_ms(),
//!     )?;
//!
//!     loop {
//!         client.tick(now_ms());
//!         while let Some(event) = client.poll_event() {
//!             match event {
//!                 ClientEvent::Connected => {
//!                     client.send(b"hello", Channel::Reliable)?;
//!                 }
//!                 ClientEvent::Data(data, channel) => {
//!                     println!("{} bytes on {:?}", data.len(), channel);
//!                 }
//!                 ClientEvent::Disconnected => return Ok(()),
//!                 ClientEvent::Error(e) => eprintln!("{e}"),
//!             }
//!         }
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod peer;
pub mod pool;
pub mod server;
pub mod transport;

pub use client::{Client, ClientEvent};
pub use config::Config;
pub use error::{LinkError, LinkResult};
pub use frame::{
    reliable_max_message_size, unreliable_max_message_size, Channel, Opcode,
};
pub use peer::{Peer, PeerEvent, PeerState, PING_INTERVAL};
pub use server::{connection_id, ConnectionId, Server, ServerEvent};
pub use transport::{Transport, UdpTransport};

// the protocol engine, re-exported for embedders that want it directly
pub use kcp_link_core::{Kcp, KcpConfig, KcpStats};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch, truncated to u32. All session
/// arithmetic is wrap-safe, so truncation is harmless.
pub fn now_ms() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32
}
