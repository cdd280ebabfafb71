//! The KCP ARQ engine state machine.
//!
//! Pure protocol logic: no sockets, no clock, no allocator churn. The owner
//! feeds raw datagrams through [`Kcp::input`], drives time through
//! [`Kcp::update`], and drains flushed datagrams from the output queue. One
//! drained buffer corresponds to one datagram on the wire.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::config::KcpConfig;
use crate::error::{KcpError, KcpResult};
use crate::pool::SegmentPool;
use crate::protocol::{
    constants::*, seq_after, seq_before, time_diff, ConvId, KcpHeader, KcpStats, SeqNum, Segment,
    Timestamp,
};

/// RTT estimation state (RFC 6298 smoothing)
#[derive(Debug, Default)]
struct RttState {
    srtt: u32,
    rttval: u32,
    rto: u32,
    minrto: u32,
}

/// Window probing state
#[derive(Debug, Default)]
struct ProbeState {
    flags: u32,
    ts: Timestamp,
    wait: u32,
}

/// KCP protocol engine for one conversation.
pub struct Kcp {
    conv: ConvId,
    mtu: usize,
    mss: usize,
    /// -1 once a segment has been retransmitted `dead_link` times
    state: i32,

    snd_una: SeqNum,
    snd_nxt: SeqNum,
    rcv_nxt: SeqNum,

    snd_wnd: u32,
    rcv_wnd: u32,
    rmt_wnd: u32,

    cwnd: u32,
    incr: u32,
    ssthresh: u32,
    nocwnd: bool,

    rtt: RttState,
    probe: ProbeState,

    current: Timestamp,
    interval: u32,
    ts_flush: Timestamp,
    updated: bool,

    nodelay: bool,
    fastresend: u32,
    fastlimit: u32,
    xmit: u32,
    dead_link: u32,

    snd_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    acklist: Vec<(SeqNum, Timestamp)>,

    /// staging buffer, packed up to mtu before each emit
    buf: BytesMut,
    /// flushed datagrams awaiting the owner
    outputs: VecDeque<Bytes>,

    pool: SegmentPool,
    stats: KcpStats,
}

impl Kcp {
    /// Create an engine for conversation `conv`.
    pub fn new(conv: ConvId, config: KcpConfig) -> Self {
        let mtu = config.mtu.max(KCP_OVERHEAD + 1) as usize;
        let interval = config.nodelay.interval.clamp(10, 5000);
        let minrto = if config.nodelay.nodelay {
            KCP_RTO_NDL
        } else {
            KCP_RTO_MIN
        };

        Self {
            conv,
            mtu,
            mss: mtu - KCP_OVERHEAD as usize,
            state: 0,

            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,

            snd_wnd: config.snd_wnd.max(1),
            rcv_wnd: config.rcv_wnd.max(KCP_WND_RCV),
            rmt_wnd: KCP_WND_RCV,

            cwnd: 0,
            incr: 0,
            ssthresh: KCP_THRESH_INIT,
            nocwnd: !config.nodelay.congestion_window,

            rtt: RttState {
                srtt: 0,
                rttval: 0,
                rto: KCP_RTO_DEF,
                minrto,
            },
            probe: ProbeState::default(),

            current: 0,
            interval,
            ts_flush: interval,
            updated: false,

            nodelay: config.nodelay.nodelay,
            fastresend: config.nodelay.resend,
            fastlimit: config.fastlimit,
            xmit: 0,
            dead_link: config.dead_link.max(1),

            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            acklist: Vec::new(),

            buf: BytesMut::with_capacity((mtu + KCP_OVERHEAD as usize) * 3),
            outputs: VecDeque::new(),

            pool: SegmentPool::new(),
            stats: KcpStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // application side
    // ------------------------------------------------------------------

    /// Enqueue one application message for reliable delivery.
    ///
    /// The message is split into `ceil(len / mss)` fragments; the last carries
    /// `frg = 0`. Fails without queueing anything when the fragment count
    /// would not fit the receive window or the `frg` byte.
    pub fn send(&mut self, data: &[u8]) -> KcpResult<()> {
        if data.is_empty() {
            return Err(KcpError::EmptyMessage);
        }

        let count = if data.len() <= self.mss {
            1
        } else {
            data.len().div_ceil(self.mss)
        };

        if count >= self.rcv_wnd as usize || count > KCP_FRG_MAX as usize {
            return Err(KcpError::OversizeMessage {
                fragments: count,
                limit: self.rcv_wnd.min(KCP_FRG_MAX),
            });
        }

        for (i, chunk) in data.chunks(self.mss).enumerate() {
            let mut seg = self.pool.acquire();
            seg.data.extend_from_slice(chunk);
            seg.header.frg = (count - i - 1) as u8;
            self.snd_queue.push_back(seg);
        }

        self.stats.bytes_sent += data.len() as u64;
        trace!(conv = %self.conv, bytes = data.len(), fragments = count, "message queued");
        Ok(())
    }

    /// Size in bytes of the next complete message, or `None` while fragments
    /// are still missing.
    pub fn peek_size(&self) -> Option<usize> {
        let seg = self.rcv_queue.front()?;

        if seg.header.frg == 0 {
            return Some(seg.data.len());
        }

        if self.rcv_queue.len() < seg.header.frg as usize + 1 {
            return None;
        }

        let mut len = 0;
        for seg in &self.rcv_queue {
            len += seg.data.len();
            if seg.header.frg == 0 {
                break;
            }
        }
        Some(len)
    }

    /// Copy the next complete message into `buf`, reassembling fragments.
    /// Returns the number of bytes written.
    pub fn recv(&mut self, buf: &mut [u8]) -> KcpResult<usize> {
        let size = self.peek_size().ok_or(KcpError::NoMessageAvailable)?;
        if size > buf.len() {
            return Err(KcpError::BufferTooSmall {
                required: size,
                provided: buf.len(),
            });
        }

        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut len = 0;
        while let Some(seg) = self.rcv_queue.pop_front() {
            buf[len..len + seg.data.len()].copy_from_slice(&seg.data);
            len += seg.data.len();
            let last = seg.header.frg == 0;
            self.pool.release(seg);
            if last {
                break;
            }
        }
        debug_assert_eq!(len, size);

        self.move_rcv_buf_to_queue();

        // tell the remote the window opened up again
        if recover && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe.flags |= KCP_ASK_TELL;
        }

        self.stats.bytes_received += len as u64;
        Ok(len)
    }

    // ------------------------------------------------------------------
    // wire side
    // ------------------------------------------------------------------

    /// Consume one raw datagram, which may contain several concatenated
    /// segments. Malformed input is rejected without poisoning the engine;
    /// the caller decides whether to log or drop the connection.
    pub fn input(&mut self, mut data: &[u8]) -> KcpResult<()> {
        if data.len() < KcpHeader::SIZE {
            return Err(KcpError::SegmentTooShort(data.len()));
        }

        let prev_una = self.snd_una;
        let mut flag = false;
        let mut max_ack: SeqNum = 0;
        let mut latest_ts: Timestamp = 0;

        while data.len() >= KcpHeader::SIZE {
            let header = match KcpHeader::decode(&mut data) {
                Some(h) => h,
                None => break,
            };

            if header.conv != self.conv {
                return Err(KcpError::ConvMismatch {
                    expected: self.conv,
                    actual: header.conv,
                });
            }

            if !matches!(
                header.cmd,
                KCP_CMD_PUSH | KCP_CMD_ACK | KCP_CMD_WASK | KCP_CMD_WINS
            ) {
                return Err(KcpError::UnknownCommand(header.cmd));
            }

            let len = header.len as usize;
            if len > data.len() {
                return Err(KcpError::PayloadOverflow {
                    declared: len,
                    available: data.len(),
                });
            }

            self.rmt_wnd = header.wnd as u32;
            self.parse_una(header.una);
            self.shrink_buf();

            match header.cmd {
                KCP_CMD_ACK => {
                    let rtt = time_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.update_ack(rtt as u32);
                    }
                    self.parse_ack(header.sn);
                    self.shrink_buf();

                    if !flag {
                        flag = true;
                        max_ack = header.sn;
                        latest_ts = header.ts;
                    } else if seq_after(header.sn, max_ack) {
                        max_ack = header.sn;
                        latest_ts = header.ts;
                    }
                }
                KCP_CMD_PUSH => {
                    if seq_before(header.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) {
                        self.ack_push(header.sn, header.ts);
                        if !seq_before(header.sn, self.rcv_nxt) {
                            let mut seg = self.pool.acquire();
                            seg.header = header.clone();
                            seg.data.extend_from_slice(&data[..len]);
                            self.parse_data(seg);
                        }
                    }
                }
                KCP_CMD_WASK => {
                    self.probe.flags |= KCP_ASK_TELL;
                    trace!(conv = %self.conv, "window probe request");
                }
                KCP_CMD_WINS => {
                    // window announcement, nothing beyond the rmt_wnd update
                }
                _ => unreachable!(),
            }

            data.advance(len);
        }

        if flag {
            self.parse_fastack(max_ack, latest_ts);
        }

        // additive increase once new data got acknowledged
        if seq_after(self.snd_una, prev_una) && self.cwnd < self.rmt_wnd {
            let mss = self.mss as u32;
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr += mss;
            } else {
                if self.incr < mss {
                    self.incr = mss;
                }
                self.incr += (mss * mss) / self.incr + (mss / 16);
                if (self.cwnd + 1) * mss <= self.incr {
                    self.cwnd = self.incr.div_ceil(mss.max(1));
                }
            }
            if self.cwnd > self.rmt_wnd {
                self.cwnd = self.rmt_wnd;
                self.incr = self.rmt_wnd * mss;
            }
        }

        self.stats.packets_received += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // scheduling
    // ------------------------------------------------------------------

    /// Advance the engine clock; flushes when the cadence elapsed.
    ///
    /// Clock jumps beyond ±10 s resynchronize the flush timestamp instead of
    /// flushing in a tight loop.
    pub fn update(&mut self, current: Timestamp) {
        self.current = current;

        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut slap = time_diff(current, self.ts_flush);
        if !(-10000..10000).contains(&slap) {
            self.ts_flush = current;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if time_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Milliseconds until [`Kcp::update`] next needs to run, for epoll-style
    /// owners. 0 means "call update now".
    pub fn check(&self, current: Timestamp) -> u32 {
        if !self.updated {
            return 0;
        }

        let mut ts_flush = self.ts_flush;
        if !(-10000..10000).contains(&time_diff(current, ts_flush)) {
            ts_flush = current;
        }
        if time_diff(current, ts_flush) >= 0 {
            return 0;
        }

        let tm_flush = time_diff(ts_flush, current) as u32;
        let mut tm_packet = u32::MAX;
        for seg in &self.snd_buf {
            let diff = time_diff(seg.resendts, current);
            if diff <= 0 {
                return 0;
            }
            tm_packet = tm_packet.min(diff as u32);
        }

        tm_packet.min(tm_flush).min(self.interval)
    }

    /// Flush acks, probes, and window-permitted data into the output queue.
    pub fn flush(&mut self) {
        // update() establishes the clock first
        if !self.updated {
            return;
        }

        let current = self.current;
        let wnd = self.wnd_unused();
        let mut hdr = KcpHeader {
            conv: self.conv,
            cmd: KCP_CMD_ACK,
            frg: 0,
            wnd,
            ts: 0,
            sn: 0,
            una: self.rcv_nxt,
            len: 0,
        };

        // pending acks, header-only segments packed to mtu
        for i in 0..self.acklist.len() {
            self.make_space(KcpHeader::SIZE);
            let (sn, ts) = self.acklist[i];
            hdr.sn = sn;
            hdr.ts = ts;
            hdr.encode(&mut self.buf);
        }
        self.acklist.clear();

        // schedule a probe while the remote window is closed
        if self.rmt_wnd == 0 {
            if self.probe.wait == 0 {
                self.probe.wait = KCP_PROBE_INIT;
                self.probe.ts = current.wrapping_add(self.probe.wait);
            } else if time_diff(current, self.probe.ts) >= 0 {
                if self.probe.wait < KCP_PROBE_INIT {
                    self.probe.wait = KCP_PROBE_INIT;
                }
                self.probe.wait += self.probe.wait / 2;
                if self.probe.wait > KCP_PROBE_LIMIT {
                    self.probe.wait = KCP_PROBE_LIMIT;
                }
                self.probe.ts = current.wrapping_add(self.probe.wait);
                self.probe.flags |= KCP_ASK_SEND;
            }
        } else {
            self.probe.ts = 0;
            self.probe.wait = 0;
        }

        if self.probe.flags & KCP_ASK_SEND != 0 {
            hdr.cmd = KCP_CMD_WASK;
            hdr.sn = 0;
            hdr.ts = 0;
            self.make_space(KcpHeader::SIZE);
            hdr.encode(&mut self.buf);
        }
        if self.probe.flags & KCP_ASK_TELL != 0 {
            hdr.cmd = KCP_CMD_WINS;
            hdr.sn = 0;
            hdr.ts = 0;
            self.make_space(KcpHeader::SIZE);
            hdr.encode(&mut self.buf);
        }
        self.probe.flags = 0;

        // effective send window
        let mut cwnd = self.snd_wnd.min(self.rmt_wnd);
        if !self.nocwnd {
            cwnd = cwnd.min(self.cwnd);
        }

        // admit queued messages into the window
        while time_diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.header.conv = self.conv;
            seg.header.cmd = KCP_CMD_PUSH;
            seg.header.wnd = wnd;
            seg.header.ts = current;
            seg.header.sn = self.snd_nxt;
            seg.header.una = self.rcv_nxt;
            seg.resendts = current;
            seg.rto = self.rtt.rto;
            seg.fastack = 0;
            seg.xmit = 0;
            seg.acked = false;
            self.snd_buf.push_back(seg);
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
        }

        let resent = if self.fastresend > 0 {
            self.fastresend
        } else {
            u32::MAX
        };
        let rtomin = if self.nodelay { 0 } else { self.rtt.rto >> 3 };

        let mut lost = false;
        let mut change = false;
        let mut dead = false;
        let rcv_nxt = self.rcv_nxt;
        let mtu = self.mtu;

        for seg in self.snd_buf.iter_mut() {
            if seg.acked {
                continue;
            }

            let mut needsend = false;
            if seg.xmit == 0 {
                // initial transmit
                needsend = true;
                seg.xmit = 1;
                seg.rto = self.rtt.rto;
                seg.resendts = current.wrapping_add(seg.rto).wrapping_add(rtomin);
            } else if time_diff(current, seg.resendts) >= 0 {
                // rto expired
                needsend = true;
                seg.xmit += 1;
                self.xmit += 1;
                if self.nodelay {
                    seg.rto += seg.rto / 2;
                } else {
                    seg.rto += seg.rto.max(self.rtt.rto);
                }
                seg.resendts = current.wrapping_add(seg.rto);
                lost = true;
                self.stats.retransmissions += 1;
            } else if seg.fastack >= resent && (seg.xmit <= self.fastlimit || self.fastlimit == 0) {
                // enough acks for higher sequence numbers arrived
                needsend = true;
                seg.xmit += 1;
                seg.fastack = 0;
                seg.resendts = current.wrapping_add(seg.rto);
                change = true;
                self.stats.fast_retransmissions += 1;
            }

            if needsend {
                seg.header.ts = current;
                seg.header.wnd = wnd;
                seg.header.una = rcv_nxt;

                let need = KcpHeader::SIZE + seg.data.len();
                if self.buf.len() + need > mtu && !self.buf.is_empty() {
                    self.outputs.push_back(self.buf.split().freeze());
                    self.stats.packets_sent += 1;
                }
                seg.encode(&mut self.buf);

                if seg.xmit >= self.dead_link {
                    self.state = -1;
                    dead = true;
                }
            }
        }

        if dead {
            warn!(
                conv = %self.conv,
                limit = self.dead_link,
                "dead link: segment exceeded retransmit limit"
            );
        }

        self.emit();

        // multiplicative decrease
        if change {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.ssthresh = (inflight / 2).max(KCP_THRESH_MIN);
            self.cwnd = self.ssthresh + resent;
            self.incr = self.cwnd * self.mss as u32;
        }
        if lost {
            self.ssthresh = (cwnd / 2).max(KCP_THRESH_MIN);
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
    }

    /// Pop the next flushed datagram, if any.
    pub fn poll_output(&mut self) -> Option<Bytes> {
        self.outputs.pop_front()
    }

    /// Drain every flushed datagram.
    pub fn drain_output(&mut self) -> Vec<Bytes> {
        self.outputs.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    /// Change the datagram size floor. Rejects values too small for one
    /// header plus a byte of payload.
    pub fn set_mtu(&mut self, mtu: u32) -> KcpResult<()> {
        if mtu < 50 || mtu <= KCP_OVERHEAD {
            return Err(KcpError::InvalidMtu(mtu));
        }
        self.mtu = mtu as usize;
        self.mss = self.mtu - KCP_OVERHEAD as usize;
        self.buf.reserve((self.mtu + KCP_OVERHEAD as usize) * 3);
        Ok(())
    }

    /// Flush cadence in milliseconds, clamped to [10, 5000].
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.clamp(10, 5000);
    }

    /// Latency tuning: aggressive RTO handling, cadence, fast-retransmit
    /// threshold, and congestion-control enablement in one call.
    pub fn set_nodelay(&mut self, nodelay: bool, interval: u32, resend: u32, congestion: bool) {
        self.nodelay = nodelay;
        self.rtt.minrto = if nodelay { KCP_RTO_NDL } else { KCP_RTO_MIN };
        self.interval = interval.clamp(10, 5000);
        self.fastresend = resend;
        self.nocwnd = !congestion;
    }

    /// Window sizes in segments; the receive window never drops below the
    /// protocol default so maximum-fragment messages always fit.
    pub fn set_window_size(&mut self, snd_wnd: u32, rcv_wnd: u32) {
        if snd_wnd > 0 {
            self.snd_wnd = snd_wnd;
        }
        self.rcv_wnd = rcv_wnd.max(KCP_WND_RCV);
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    pub fn conv(&self) -> ConvId {
        self.conv
    }

    /// Maximum payload bytes per segment
    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.rcv_wnd
    }

    /// -1 once the link is dead, 0 otherwise
    pub fn state(&self) -> i32 {
        self.state
    }

    /// Force the link state; used by the session layer and by tests.
    pub fn set_state(&mut self, state: i32) {
        self.state = state;
    }

    pub fn snd_queue_len(&self) -> usize {
        self.snd_queue.len()
    }

    pub fn snd_buf_len(&self) -> usize {
        self.snd_buf.len()
    }

    pub fn rcv_queue_len(&self) -> usize {
        self.rcv_queue.len()
    }

    pub fn rcv_buf_len(&self) -> usize {
        self.rcv_buf.len()
    }

    /// Segments occupying send and receive queues and buffers combined
    pub fn total_queued(&self) -> usize {
        self.snd_queue.len() + self.snd_buf.len() + self.rcv_queue.len() + self.rcv_buf.len()
    }

    /// Oldest unacknowledged sequence number
    pub fn snd_una(&self) -> SeqNum {
        self.snd_una
    }

    /// Next sequence number to assign
    pub fn snd_nxt(&self) -> SeqNum {
        self.snd_nxt
    }

    /// Next expected receive sequence number
    pub fn rcv_nxt(&self) -> SeqNum {
        self.rcv_nxt
    }

    /// Snapshot of the engine counters and live queue depths
    pub fn stats(&self) -> KcpStats {
        let mut stats = self.stats;
        stats.srtt = self.rtt.srtt;
        stats.rttvar = self.rtt.rttval;
        stats.rto = self.rtt.rto;
        stats.cwnd = self.cwnd;
        stats.snd_queue = self.snd_queue.len() as u32;
        stats.snd_buf = self.snd_buf.len() as u32;
        stats.rcv_buf = self.rcv_buf.len() as u32;
        stats.rcv_queue = self.rcv_queue.len() as u32;
        stats
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn wnd_unused(&self) -> u16 {
        // the wire field is 16 bits; huge configured windows saturate
        (self.rcv_wnd as usize)
            .saturating_sub(self.rcv_queue.len())
            .min(u16::MAX as usize) as u16
    }

    /// Emit the staging buffer if `need` more bytes would overflow the mtu.
    fn make_space(&mut self, need: usize) {
        if self.buf.len() + need > self.mtu && !self.buf.is_empty() {
            self.emit();
        }
    }

    /// Move the staging buffer into the output queue as one datagram.
    fn emit(&mut self) {
        if !self.buf.is_empty() {
            self.outputs.push_back(self.buf.split().freeze());
            self.stats.packets_sent += 1;
        }
    }

    /// Remove every in-flight segment the cumulative ack covers.
    fn parse_una(&mut self, una: SeqNum) {
        while let Some(seg) = self.snd_buf.front() {
            if seq_before(seg.header.sn, una) {
                let seg = self.snd_buf.pop_front().expect("front checked");
                self.pool.release(seg);
            } else {
                break;
            }
        }
    }

    /// Mark a specifically acked segment. It stays in place until the una
    /// sweep removes it, which keeps ack processing O(1) amortized even with
    /// very large windows.
    fn parse_ack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        for seg in self.snd_buf.iter_mut() {
            if seg.header.sn == sn {
                seg.acked = true;
                break;
            }
            if seq_after(seg.header.sn, sn) {
                break;
            }
        }
    }

    /// Count ack evidence for segments below the highest acked sn this round.
    fn parse_fastack(&mut self, sn: SeqNum, ts: Timestamp) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        for seg in self.snd_buf.iter_mut() {
            if seq_before(sn, seg.header.sn) {
                break;
            }
            if sn != seg.header.sn && time_diff(ts, seg.header.ts) >= 0 {
                seg.fastack += 1;
            }
        }
    }

    fn shrink_buf(&mut self) {
        self.snd_una = self
            .snd_buf
            .front()
            .map(|seg| seg.header.sn)
            .unwrap_or(self.snd_nxt);
    }

    fn ack_push(&mut self, sn: SeqNum, ts: Timestamp) {
        self.acklist.push((sn, ts));
    }

    /// Insert an in-window PUSH segment into the receive buffer, keeping it
    /// sorted and duplicate-free, then migrate the contiguous prefix.
    fn parse_data(&mut self, seg: Segment) {
        let sn = seg.header.sn;

        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) || seq_before(sn, self.rcv_nxt)
        {
            self.pool.release(seg);
            return;
        }

        // scan backwards: new data usually lands at the tail
        let mut repeat = false;
        let mut insert_at = self.rcv_buf.len();
        for (i, existing) in self.rcv_buf.iter().enumerate().rev() {
            if existing.header.sn == sn {
                repeat = true;
                break;
            }
            if seq_before(sn, existing.header.sn) {
                insert_at = i;
            } else {
                break;
            }
        }

        if repeat {
            self.pool.release(seg);
        } else {
            self.rcv_buf.insert(insert_at, seg);
        }

        self.move_rcv_buf_to_queue();
    }

    /// Migrate contiguous segments to the receive queue while the window
    /// allows, advancing `rcv_nxt`.
    fn move_rcv_buf_to_queue(&mut self) {
        while let Some(seg) = self.rcv_buf.front() {
            if seg.header.sn == self.rcv_nxt && self.rcv_queue.len() < self.rcv_wnd as usize {
                let seg = self.rcv_buf.pop_front().expect("front checked");
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            } else {
                break;
            }
        }
    }

    /// RFC 6298 smoothing and RTO recomputation.
    fn update_ack(&mut self, rtt: u32) {
        if self.rtt.srtt == 0 {
            self.rtt.srtt = rtt;
            self.rtt.rttval = rtt / 2;
        } else {
            let delta = self.rtt.srtt.abs_diff(rtt);
            self.rtt.rttval = (3 * self.rtt.rttval + delta) / 4;
            self.rtt.srtt = ((7 * self.rtt.srtt + rtt) / 8).max(1);
        }

        let rto = self.rtt.srtt + self.interval.max(4 * self.rtt.rttval);
        self.rtt.rto = rto.clamp(self.rtt.minrto, KCP_RTO_MAX);
    }
}
