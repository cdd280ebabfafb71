//! Process-wide transport metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Aggregate counters across every server and client in the process.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// Handshakes that produced a live connection
    pub connections_accepted: AtomicU64,
    /// First-contact datagrams that never authenticated
    pub connections_rejected: AtomicU64,
    /// Connections alive right now
    pub connections_current: AtomicUsize,
    /// Datagrams handed to the transport
    pub datagrams_sent: AtomicU64,
    /// Datagrams read from the transport
    pub datagrams_received: AtomicU64,
    /// Raw bytes handed to the transport
    pub bytes_sent: AtomicU64,
    /// Raw bytes read from the transport
    pub bytes_received: AtomicU64,
}

impl LinkMetrics {
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_current.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn datagram_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn datagram_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_current: self.connections_current.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LinkMetrics`]
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_current: usize,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

static GLOBAL: LazyLock<LinkMetrics> = LazyLock::new(LinkMetrics::default);

/// The process-wide metrics instance.
pub fn global() -> &'static LinkMetrics {
    &GLOBAL
}
