//! Pure synchronous KCP protocol engine.
//!
//! This crate implements the KCP ARQ protocol with no runtime dependencies:
//! no async, no I/O, no clock. The owner supplies time and raw datagrams and
//! drains the datagrams the engine wants on the wire.
//!
//! ```text
//! ┌────────────────────────────┐
//! │  kcp-link-core             │
//! │                            │
//! │  protocol  ← wire types    │
//! │  pool      ← segment reuse │
//! │  config    ← tuning        │
//! │  error     ← engine errors │
//! │  kcp       ← state machine │
//! └────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod kcp;
pub mod pool;
pub mod protocol;

pub use config::{KcpConfig, NoDelayConfig};
pub use error::{KcpError, KcpResult};
pub use kcp::Kcp;
pub use protocol::*;
