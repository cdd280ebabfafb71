//! Error types for the session layer

use thiserror::Error;

/// Result type for session operations
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Session-layer errors.
///
/// Variant names are stable across ports of this transport; embedders match
/// on them to decide what to surface to users.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Hostname could not be resolved to an address
    #[error("dns resolve failed: {0}")]
    DnsResolve(String),

    /// Underlying datagram socket failure
    #[error("socket error: {0}")]
    SocketError(#[from] std::io::Error),

    /// Operation on a connection that is gone or was never established
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Peer fell silent longer than the configured timeout, or a segment
    /// exceeded the retransmit limit (dead link)
    #[error("timeout: {0}")]
    Timeout(String),

    /// Send/receive queues crossed the disconnect threshold
    #[error("congestion: {0}")]
    Congestion(String),

    /// Inbound data the protocol cannot accept
    #[error("invalid receive: {0}")]
    InvalidReceive(String),

    /// Outbound message the protocol cannot carry (empty, oversize, wrong state)
    #[error("invalid send: {0}")]
    InvalidSend(String),

    /// Anything that indicates a bug rather than a network condition
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl LinkError {
    /// Errors that end the peer but leave the process healthy.
    pub fn is_fatal_to_peer(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout(_) | LinkError::Congestion(_) | LinkError::InvalidReceive(_)
        )
    }

    /// Errors returned to the caller without touching connection state.
    pub fn is_send_error(&self) -> bool {
        matches!(self, LinkError::InvalidSend(_) | LinkError::ConnectionClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(LinkError::Timeout("t".into()).is_fatal_to_peer());
        assert!(LinkError::Congestion("c".into()).is_fatal_to_peer());
        assert!(!LinkError::InvalidSend("s".into()).is_fatal_to_peer());
        assert!(LinkError::InvalidSend("s".into()).is_send_error());
    }
}
