//! Error types for the KCP protocol engine

use std::fmt;

/// Result type for engine operations
pub type KcpResult<T> = std::result::Result<T, KcpError>;

/// Errors produced by the protocol engine.
///
/// `input` errors mean one malformed datagram; the caller logs and keeps the
/// connection. `send`/`recv` errors are returned to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KcpError {
    /// Segment carries a conversation id this engine does not own
    ConvMismatch { expected: u32, actual: u32 },
    /// Datagram shorter than one segment header
    SegmentTooShort(usize),
    /// Declared payload length exceeds the remaining datagram bytes
    PayloadOverflow { declared: usize, available: usize },
    /// Command byte outside 81..=84
    UnknownCommand(u8),
    /// Message would fragment beyond the receive window or the frg byte
    OversizeMessage { fragments: usize, limit: u32 },
    /// Empty payload passed to `send`
    EmptyMessage,
    /// Caller buffer cannot hold the next message
    BufferTooSmall { required: usize, provided: usize },
    /// No complete message is ready
    NoMessageAvailable,
    /// Rejected mtu value
    InvalidMtu(u32),
}

impl fmt::Display for KcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KcpError::ConvMismatch { expected, actual } => {
                write!(f, "conversation id mismatch: expected {expected}, got {actual}")
            }
            KcpError::SegmentTooShort(len) => {
                write!(f, "datagram too short for a segment header: {len} bytes")
            }
            KcpError::PayloadOverflow { declared, available } => {
                write!(f, "segment declares {declared} payload bytes but only {available} remain")
            }
            KcpError::UnknownCommand(cmd) => write!(f, "unknown command byte: {cmd}"),
            KcpError::OversizeMessage { fragments, limit } => {
                write!(f, "message needs {fragments} fragments, limit is {limit}")
            }
            KcpError::EmptyMessage => write!(f, "empty message"),
            KcpError::BufferTooSmall { required, provided } => {
                write!(f, "buffer too small: message is {required} bytes, buffer holds {provided}")
            }
            KcpError::NoMessageAvailable => write!(f, "no complete message available"),
            KcpError::InvalidMtu(mtu) => write!(f, "invalid mtu: {mtu}"),
        }
    }
}

impl std::error::Error for KcpError {}
