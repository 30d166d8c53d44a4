//! # Oscsync Core
//!
//! Platform-independent logic for capturing OSC over UDP and replaying it in
//! step with recorded video.
//!
//! This crate contains pure decoding and replay logic with **no I/O
//! dependencies**: no sockets, no async runtime, no filesystem.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  oscsync-core (platform-independent, no tokio/async deps)  │
//! │  ├── osc      (datagram preview decoder)                   │
//! │  ├── event    (event records, JSON Lines codec)            │
//! │  ├── recent   (bounded recent-packet ring)                 │
//! │  ├── replay   (time-indexed replay cursor)                 │
//! │  └── io       (DatagramSink / MonotonicClock seams)        │
//! └────────────────────────────────────────────────────────────┘
//!                 ▲
//!    ┌────────────┴────────────────────────────┐
//!    │  oscsync-server                         │
//!    │  (capture task, UdpSender, SystemClock) │
//!    └─────────────────────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`osc`] - Structural OSC message/bundle decoding for previews
//! - [`event`] - Event records and the persisted log line format
//! - [`replay`] - Replay engine driven by an external clock
//! - [`io`] - Transport and clock traits ([`DatagramSink`], [`MonotonicClock`])
//!
//! ## Example: Previewing a datagram
//!
//! ```rust
//! use oscsync_core::parse_preview;
//!
//! let preview = parse_preview(b"/cue\0\0\0\0,\0\0\0");
//! assert!(preview.ok);
//! assert_eq!(preview.text, "/cue");
//! ```

pub mod error;
pub mod event;
pub mod io;
pub mod osc;
pub mod recent;
pub mod replay;

// Re-export commonly used types
pub use error::{ParseError, RecordError};
pub use event::{decode_log, decode_record, encode_record, DecodedLog, Event};
pub use io::{DatagramSink, IoError, MonotonicClock};
pub use osc::{parse_preview, OscDecoder, OscPreview, PreviewKind};
pub use recent::{RecentPacket, RecentRing, MAX_RECENT_PACKETS};
pub use replay::{logical_time, ReplayEngine, TickStatus, DEFAULT_TARGET};
