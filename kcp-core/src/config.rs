//! Configuration types for the KCP protocol engine

use crate::protocol::constants;

/// No-delay tuning block: latency/throughput trade-offs in one place.
#[derive(Debug, Clone)]
pub struct NoDelayConfig {
    /// Aggressive mode: lower minimum RTO, gentler RTO backoff
    pub nodelay: bool,
    /// Flush cadence in milliseconds, clamped to [10, 5000]
    pub interval: u32,
    /// Duplicate-ACK threshold for fast retransmit; 0 disables
    pub resend: u32,
    /// Enable AIMD congestion control
    pub congestion_window: bool,
}

impl NoDelayConfig {
    /// Conservative defaults matching the original protocol
    pub fn normal() -> Self {
        Self {
            nodelay: false,
            interval: constants::KCP_INTERVAL,
            resend: 0,
            congestion_window: false,
        }
    }

    /// Low-latency mode: 10 ms cadence, fast retransmit after 2 dup-acks
    pub fn fast() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            resend: 2,
            congestion_window: false,
        }
    }
}

impl Default for NoDelayConfig {
    fn default() -> Self {
        Self::normal()
    }
}

/// Protocol-only configuration for the engine.
///
/// Contains only the fields the engine reads; transport and session settings
/// live in the session crate.
#[derive(Debug, Clone)]
pub struct KcpConfig {
    /// Maximum transmission unit for emitted datagrams
    pub mtu: u32,
    /// Send window size in segments
    pub snd_wnd: u32,
    /// Receive window size in segments; raised to at least 128
    pub rcv_wnd: u32,
    /// No-delay tuning block
    pub nodelay: NoDelayConfig,
    /// Retransmissions of a single segment before the link is declared dead
    pub dead_link: u32,
    /// Fast-retransmit cap per segment
    pub fastlimit: u32,
}

impl Default for KcpConfig {
    fn default() -> Self {
        Self {
            mtu: constants::KCP_MTU_DEF,
            snd_wnd: constants::KCP_WND_SND,
            rcv_wnd: constants::KCP_WND_RCV,
            nodelay: NoDelayConfig::normal(),
            dead_link: constants::KCP_DEADLINK,
            fastlimit: constants::KCP_FASTACK_LIMIT,
        }
    }
}
