//! # Oscsync Server
//!
//! Capture OSC over UDP while a video is recorded, and replay it later in step
//! with the video.
//!
//! ## Architecture
//!
//! The server is built on top of [`oscsync_core`] for decoding and replay
//! logic, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    oscsync-server                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │ CLI (clap)   │  │ REST API     │  │ inspect        │  │
//! │  │ record/play  │  │ (axum)       │  │                │  │
//! │  └──────┬───────┘  └──────┬───────┘  └────────────────┘  │
//! │         ▼                 ▼                              │
//! │  ┌──────────────────────┐  ┌──────────────────────────┐  │
//! │  │ CaptureEngine        │  │ ReplayEngine<UdpSender>  │  │
//! │  │ - receive task       │  │ - driven by tick()       │  │
//! │  │ - EventLogWriter     │  │ - load_all()             │  │
//! │  └──────────────────────┘  └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`capture::CaptureEngine`] - UDP capture into a session directory
//! - [`eventlog`] - Session log writer and loader
//! - [`network::UdpSender`] - Replay transport
//! - [`network::SystemClock`] - Process-wide monotonic clock
//!
//! ## REST API
//!
//! Served by the `serve` command:
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /api/v1/record/start` | Start a capture session |
//! | `POST /api/v1/record/stop` | Stop the capture |
//! | `GET /api/v1/record/status` | Capture status and recent packets |
//! | `POST /api/v1/play/load` | Load a session log for replay |
//! | `POST /api/v1/play/target` | Set the replay destination |
//! | `POST /api/v1/play/reset` | Seek to a time |
//! | `POST /api/v1/play/tick` | Send everything due at a video time |
//! | `POST /api/v1/preview` | Decode a raw datagram |
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options.

extern crate tokio;

use clap::{Parser, Subcommand};
use std::net::SocketAddrV4;
use std::path::PathBuf;

pub mod capture;
pub mod config;
pub mod eventlog;
pub mod network;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Capture UDP datagrams into a new session until interrupted
    Record {
        /// UDP port to listen on
        #[arg(short, long)]
        port: u16,

        /// Directory to create the session in (default: the data directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Recorded in the session metadata
        #[arg(long)]
        remote_control_url: Option<String>,
    },

    /// Replay a session log in real time
    Play {
        /// Path to a udp.jsonl event log
        log: PathBuf,

        /// Destination of replayed datagrams
        #[arg(short, long, default_value_t = oscsync_core::DEFAULT_TARGET)]
        target: SocketAddrV4,

        /// Sync offset added to the playback time
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        offset_ms: f64,

        /// Playback position to start from, in seconds
        #[arg(short, long, default_value_t = 0.0)]
        start: f64,

        /// Tick period
        #[arg(long, default_value_t = config::DEFAULT_TICK_INTERVAL.as_millis() as u64)]
        interval_ms: u64,
    },

    /// Print every event of a log with its OSC preview
    Inspect {
        /// Path to a udp.jsonl event log
        log: PathBuf,
    },

    /// Run the HTTP control API
    Serve {
        /// Port for webserver
        #[arg(short = 'p', long, default_value_t = config::DEFAULT_HTTP_PORT)]
        http_port: u16,
    },
}
