//! Datagram framing shared by both channels.
//!
//! Every UDP payload starts with `[channel:1][cookie:4]`. Reliable datagrams
//! continue with packed KCP segments; unreliable datagrams continue with
//! `[opcode:1][payload]`. Reliable messages inside KCP are likewise
//! `[opcode:1][payload]`.

use bytes::{Buf, BufMut, BytesMut};
use kcp_link_core::protocol::constants::{KCP_FRG_MAX, KCP_OVERHEAD};

/// Channel byte size on the wire
pub const CHANNEL_HEADER_SIZE: usize = 1;
/// Anti-spoof cookie size on the wire
pub const COOKIE_SIZE: usize = 4;
/// Bytes every datagram spends before channel-specific content
pub const METADATA_SIZE: usize = CHANNEL_HEADER_SIZE + COOKIE_SIZE;

/// Delivery channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// Ordered, retransmitted, flow-controlled
    Reliable = 1,
    /// Fire and forget, bypasses KCP entirely
    Unreliable = 2,
}

impl Channel {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Channel::Reliable),
            2 => Some(Channel::Unreliable),
            _ => None,
        }
    }
}

/// First byte of every message body on either channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Handshake; payload carries the 4-byte session cookie
    Hello = 0,
    /// Keepalive
    Ping = 1,
    /// Application payload
    Data = 2,
    /// Polite goodbye
    Disconnect = 3,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Opcode::Hello),
            1 => Some(Opcode::Ping),
            2 => Some(Opcode::Data),
            3 => Some(Opcode::Disconnect),
            _ => None,
        }
    }
}

/// Parsed view over one inbound datagram.
#[derive(Debug)]
pub struct DatagramView<'a> {
    pub channel: Channel,
    pub cookie: u32,
    pub body: &'a [u8],
}

/// Split a raw datagram into channel, cookie, and body.
/// `None` for anything too short or with an unknown channel byte.
pub fn parse_datagram(mut data: &[u8]) -> Option<DatagramView<'_>> {
    if data.len() <= METADATA_SIZE {
        return None;
    }
    let channel = Channel::from_byte(data.get_u8())?;
    let cookie = data.get_u32_le();
    Some(DatagramView {
        channel,
        cookie,
        body: data,
    })
}

/// Write the `[channel][cookie]` prefix.
pub fn write_frame_header(buf: &mut BytesMut, channel: Channel, cookie: u32) {
    buf.put_u8(channel as u8);
    buf.put_u32_le(cookie);
}

/// Largest reliable message the session can carry: one opcode byte plus
/// payload, fragmented across at most `min(rcv_wnd, 255) − 1` KCP segments
/// whose mtu already lost the frame metadata.
pub fn reliable_max_message_size(mtu: u32, rcv_wnd: u32) -> usize {
    let mss = mtu as usize - KCP_OVERHEAD as usize - METADATA_SIZE;
    let fragments = rcv_wnd.min(KCP_FRG_MAX) as usize - 1;
    mss * fragments - 1
}

/// Largest unreliable message: mtu minus frame metadata minus the opcode.
pub fn unreliable_max_message_size(mtu: u32) -> usize {
    mtu as usize - METADATA_SIZE - 1
}
