//! Lock-free datagram buffer pool.
//!
//! Every outbound datagram is assembled in a pooled buffer: frame header,
//! then either packed KCP segments or an unreliable payload. Owners return
//! buffers after the transport send so steady traffic stops allocating.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Buffers retained at most; overflow is simply dropped to the allocator.
const POOL_CAPACITY: usize = 1024;

/// Capacity of fresh buffers; covers any datagram up to a generous mtu.
const DATAGRAM_CAPACITY: usize = 2048;

struct DatagramPool {
    pool: ArrayQueue<BytesMut>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl DatagramPool {
    fn new() -> Self {
        Self {
            pool: ArrayQueue::new(POOL_CAPACITY),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> BytesMut {
        match self.pool.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(DATAGRAM_CAPACITY)
            }
        }
    }

    fn put(&self, mut buf: BytesMut) {
        // oversized or shrunken buffers are not worth keeping
        if buf.capacity() >= DATAGRAM_CAPACITY / 2 && buf.capacity() <= DATAGRAM_CAPACITY * 2 {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }
}

static DATAGRAM_POOL: LazyLock<DatagramPool> = LazyLock::new(DatagramPool::new);

/// Take an empty buffer for one outbound datagram.
pub fn acquire_datagram() -> BytesMut {
    DATAGRAM_POOL.get()
}

/// Return a buffer once the datagram hit the transport.
pub fn release_datagram(buf: BytesMut) {
    DATAGRAM_POOL.put(buf);
}

/// (hits, misses, idle) counters for monitoring.
pub fn pool_stats() -> (usize, usize, usize) {
    (
        DATAGRAM_POOL.hits.load(Ordering::Relaxed),
        DATAGRAM_POOL.misses.load(Ordering::Relaxed),
        DATAGRAM_POOL.pool.len(),
    )
}
