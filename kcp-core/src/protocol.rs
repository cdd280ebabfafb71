//! KCP wire types, constants, and sequence/time arithmetic

use bytes::{Buf, BufMut, BytesMut};

/// KCP protocol constants
pub mod constants {
    pub const KCP_RTO_NDL: u32 = 30; // no delay min rto
    pub const KCP_RTO_MIN: u32 = 100; // normal min rto
    pub const KCP_RTO_DEF: u32 = 200; // default rto
    pub const KCP_RTO_MAX: u32 = 60000; // max rto
    pub const KCP_CMD_PUSH: u8 = 81; // cmd: push data
    pub const KCP_CMD_ACK: u8 = 82; // cmd: ack
    pub const KCP_CMD_WASK: u8 = 83; // cmd: window probe (ask)
    pub const KCP_CMD_WINS: u8 = 84; // cmd: window size (tell)
    pub const KCP_ASK_SEND: u32 = 1; // need to send KCP_CMD_WASK
    pub const KCP_ASK_TELL: u32 = 2; // need to send KCP_CMD_WINS
    pub const KCP_WND_SND: u32 = 32; // default send window
    pub const KCP_WND_RCV: u32 = 128; // default receive window, must be >= max fragment count
    pub const KCP_MTU_DEF: u32 = 1200; // default mtu
    pub const KCP_INTERVAL: u32 = 100; // default update interval
    pub const KCP_OVERHEAD: u32 = 24; // kcp header overhead
    pub const KCP_DEADLINK: u32 = 20; // max retransmits before dead link
    pub const KCP_THRESH_INIT: u32 = 2; // initial slow start threshold
    pub const KCP_THRESH_MIN: u32 = 2; // min slow start threshold
    pub const KCP_PROBE_INIT: u32 = 7000; // 7 secs to probe window size
    pub const KCP_PROBE_LIMIT: u32 = 120000; // up to 120 secs to probe window
    pub const KCP_FASTACK_LIMIT: u32 = 5; // max times to trigger fast resend
    pub const KCP_FRG_MAX: u32 = 255; // frg is a u8
}

/// Conversation ID type
pub type ConvId = u32;

/// Sequence number type
pub type SeqNum = u32;

/// Timestamp type (milliseconds, externally supplied, wrap-safe)
pub type Timestamp = u32;

/// KCP segment header.
///
/// Wire layout is 24 bytes of little-endian fields:
/// `conv:4 cmd:1 frg:1 wnd:2 ts:4 sn:4 una:4 len:4`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KcpHeader {
    pub conv: ConvId,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: Timestamp,
    pub sn: SeqNum,
    pub una: SeqNum,
    pub len: u32,
}

impl KcpHeader {
    /// Size of KCP header in bytes
    pub const SIZE: usize = 24;

    /// Encode header into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode header from buffer; `None` if fewer than [`Self::SIZE`] bytes remain.
    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }

        Some(Self {
            conv: buf.get_u32_le(),
            cmd: buf.get_u8(),
            frg: buf.get_u8(),
            wnd: buf.get_u16_le(),
            ts: buf.get_u32_le(),
            sn: buf.get_u32_le(),
            una: buf.get_u32_le(),
            len: buf.get_u32_le(),
        })
    }

    /// Command name for log output
    pub fn cmd_str(&self) -> &'static str {
        match self.cmd {
            constants::KCP_CMD_PUSH => "PUSH",
            constants::KCP_CMD_ACK => "ACK",
            constants::KCP_CMD_WASK => "WASK",
            constants::KCP_CMD_WINS => "WINS",
            _ => "UNKNOWN",
        }
    }
}

/// A KCP segment: one message fragment plus retransmission bookkeeping.
///
/// The bookkeeping fields never go on the wire; they only matter while the
/// segment sits in the send buffer.
#[derive(Debug, Default)]
pub struct Segment {
    pub header: KcpHeader,
    pub data: BytesMut,

    /// next retransmission deadline
    pub resendts: Timestamp,
    /// per-segment retransmission timeout
    pub rto: u32,
    /// acks seen for higher sequence numbers
    pub fastack: u32,
    /// transmission count
    pub xmit: u32,
    /// acked but not yet swept by una
    pub acked: bool,
}

impl Segment {
    /// Encode header (with `len` taken from the payload) plus payload.
    pub fn encode(&mut self, buf: &mut BytesMut) {
        self.header.len = self.data.len() as u32;
        self.header.encode(buf);
        buf.extend_from_slice(&self.data);
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        KcpHeader::SIZE + self.data.len()
    }

    /// Clear all state so the segment can go back to the pool.
    pub fn reset(&mut self) {
        self.header = KcpHeader::default();
        self.data.clear();
        self.resendts = 0;
        self.rto = 0;
        self.fastack = 0;
        self.xmit = 0;
        self.acked = false;
    }
}

/// Point-in-time engine statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct KcpStats {
    /// Total payload bytes accepted by `send`
    pub bytes_sent: u64,
    /// Total payload bytes handed out by `recv`
    pub bytes_received: u64,
    /// Datagrams emitted
    pub packets_sent: u64,
    /// Datagrams consumed by `input`
    pub packets_received: u64,
    /// Timeout retransmissions
    pub retransmissions: u64,
    /// Fast retransmissions
    pub fast_retransmissions: u64,
    /// Smoothed RTT in milliseconds
    pub srtt: u32,
    /// RTT variance
    pub rttvar: u32,
    /// Current RTO
    pub rto: u32,
    /// Congestion window
    pub cwnd: u32,
    /// Segments waiting to enter the send window
    pub snd_queue: u32,
    /// Segments in flight
    pub snd_buf: u32,
    /// Out-of-order segments held back
    pub rcv_buf: u32,
    /// Contiguous segments ready for `recv`
    pub rcv_queue: u32,
}

/// Wrap-safe time difference: positive when `later` is ahead of `earlier`.
#[inline]
pub fn time_diff(later: Timestamp, earlier: Timestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Wrap-safe "seq1 < seq2"
#[inline]
pub fn seq_before(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Wrap-safe "seq1 > seq2"
#[inline]
pub fn seq_after(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) > 0
}
