//! I/O abstraction for the platform-independent engines.
//!
//! The replay engine never touches a socket or a clock directly. It is handed a
//! [`DatagramSink`] to emit raw bytes, and capture timestamps come from a
//! [`MonotonicClock`]. The native server implements both on top of std/tokio;
//! tests implement them with plain vectors and counters.
//!
//! # Example
//!
//! ```rust
//! use oscsync_core::io::{DatagramSink, IoError};
//! use std::net::SocketAddrV4;
//!
//! #[derive(Default)]
//! struct Collect(Vec<(SocketAddrV4, Vec<u8>)>);
//!
//! impl DatagramSink for Collect {
//!     fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> Result<usize, IoError> {
//!         self.0.push((target, data.to_vec()));
//!         Ok(data.len())
//!     }
//! }
//! ```

use core::fmt;
use std::net::SocketAddrV4;

// =============================================================================
// Error Types
// =============================================================================

/// I/O error type for transport operations.
///
/// Kept as plain data so it can be copied into status snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    /// Raw OS error code, or -1 when there is none
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Send buffer full on a non-blocking socket
    pub would_block: bool,
}

impl IoError {
    /// Create a new I/O error with a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            would_block: false,
        }
    }

    /// Check if this is a "would block" error.
    pub fn is_would_block(&self) -> bool {
        self.would_block
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for IoError {}

// Status snapshots carry the error as its display string.
impl serde::Serialize for IoError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        Self {
            code: e.raw_os_error().unwrap_or(-1),
            message: e.to_string(),
            would_block: e.kind() == std::io::ErrorKind::WouldBlock,
        }
    }
}

// =============================================================================
// Transport and clock seams
// =============================================================================

/// Fire-and-forget datagram transport.
///
/// Implementations must not block: a full send buffer is reported as an error
/// and the datagram is dropped.
pub trait DatagramSink {
    /// Send one datagram to `target`, returning the number of bytes sent.
    fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> Result<usize, IoError>;
}

impl<T: DatagramSink + ?Sized> DatagramSink for Box<T> {
    fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> Result<usize, IoError> {
        (**self).send_to(data, target)
    }
}

/// Monotonic time source in seconds.
///
/// Values are only meaningful relative to each other within one process run
/// and never go backwards, regardless of wall-clock adjustments.
pub trait MonotonicClock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;
}
