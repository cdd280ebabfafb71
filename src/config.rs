//! Session configuration

use crate::error::{LinkError, LinkResult};
use crate::frame::METADATA_SIZE;
use kcp_link_core::protocol::constants::{KCP_OVERHEAD, KCP_WND_RCV, KCP_WND_SND};

/// Silence tolerance before a peer is declared gone
pub const DEFAULT_TIMEOUT: u32 = 10_000;

/// Combined queue depth at which a peer is cut loose to protect the process
pub const QUEUE_DISCONNECT_THRESHOLD: usize = 10_000;

/// One configuration struct handed to peer, server, and client constructors.
#[derive(Debug, Clone)]
pub struct Config {
    /// Aggressive RTO minimum and gentler backoff
    pub no_delay: bool,
    /// Flush cadence in milliseconds, clamped to [10, 5000] by the engine
    pub interval: u32,
    /// Duplicate-ACK threshold for fast retransmit; 0 disables
    pub fast_resend: u32,
    /// Enable AIMD congestion control. Leave off for LAN and game traffic,
    /// where it destabilizes throughput.
    pub congestion_window: bool,
    /// Send window in segments
    pub send_window_size: u32,
    /// Receive window in segments; must cover the largest fragment count
    pub receive_window_size: u32,
    /// Datagram size floor in bytes
    pub mtu: u32,
    /// Milliseconds of silence before disconnecting
    pub timeout: u32,
    /// Retransmissions of one segment before the link is declared dead
    pub max_retransmits: u32,
    /// Combined queue depth that triggers a protective disconnect
    pub queue_disconnect_threshold: usize,
    /// Server only: bind the IPv6 wildcard with IPv4-mapped support
    pub dual_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            no_delay: true,
            interval: 10,
            fast_resend: 0,
            congestion_window: false,
            send_window_size: KCP_WND_SND,
            receive_window_size: KCP_WND_RCV,
            mtu: 1200,
            timeout: DEFAULT_TIMEOUT,
            max_retransmits: 20,
            queue_disconnect_threshold: QUEUE_DISCONNECT_THRESHOLD,
            dual_mode: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency-first tuning for real-time games
    pub fn gaming() -> Self {
        Self {
            no_delay: true,
            interval: 10,
            fast_resend: 2,
            ..Self::default()
        }
    }

    /// Throughput-first tuning for bulk transfers over lossy links
    pub fn bulk() -> Self {
        Self {
            no_delay: false,
            interval: 40,
            send_window_size: 256,
            receive_window_size: 256,
            ..Self::default()
        }
    }

    pub fn interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn window_size(mut self, snd: u32, rcv: u32) -> Self {
        self.send_window_size = snd;
        self.receive_window_size = rcv;
        self
    }

    pub fn timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fast_resend(mut self, resend: u32) -> Self {
        self.fast_resend = resend;
        self
    }

    pub fn congestion_window(mut self, enabled: bool) -> Self {
        self.congestion_window = enabled;
        self
    }

    pub fn max_retransmits(mut self, retransmits: u32) -> Self {
        self.max_retransmits = retransmits;
        self
    }

    pub fn queue_disconnect_threshold(mut self, threshold: usize) -> Self {
        self.queue_disconnect_threshold = threshold;
        self
    }

    pub fn dual_mode(mut self, enabled: bool) -> Self {
        self.dual_mode = enabled;
        self
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> LinkResult<()> {
        // room for metadata, one segment header, and at least one payload byte
        let floor = (METADATA_SIZE + KCP_OVERHEAD as usize + 1) as u32;
        if self.mtu < floor || self.mtu > 65_535 {
            return Err(LinkError::Unexpected(format!(
                "mtu must be within [{floor}, 65535], got {}",
                self.mtu
            )));
        }
        if self.send_window_size == 0 || self.receive_window_size == 0 {
            return Err(LinkError::Unexpected(
                "window sizes must be greater than 0".into(),
            ));
        }
        if self.timeout == 0 {
            return Err(LinkError::Unexpected("timeout must be greater than 0".into()));
        }
        if self.max_retransmits == 0 {
            return Err(LinkError::Unexpected(
                "max_retransmits must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
