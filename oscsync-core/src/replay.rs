//! Replay engine.
//!
//! Replays a loaded event log against an externally supplied clock. The engine
//! has no timer: the caller drives it by calling [`ReplayEngine::tick`] with
//! the current logical time (usually the video position plus an offset, see
//! [`logical_time`]). Seeking is a binary search with
//! [`ReplayEngine::reset_to_time`].
//!
//! ```rust
//! use oscsync_core::event::Event;
//! use oscsync_core::io::{DatagramSink, IoError};
//! use oscsync_core::replay::ReplayEngine;
//! use std::net::SocketAddrV4;
//!
//! struct Discard;
//! impl DatagramSink for Discard {
//!     fn send_to(&mut self, data: &[u8], _: SocketAddrV4) -> Result<usize, IoError> {
//!         Ok(data.len())
//!     }
//! }
//!
//! let mut engine = ReplayEngine::new(Discard);
//! engine.load(vec![Event::new(0.1, vec![1]), Event::new(0.9, vec![2])]);
//! assert_eq!(engine.tick(0.5).sent, 1);
//! assert_eq!(engine.reset_to_time(0.0), 0);
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use serde::Serialize;

use crate::event::Event;
use crate::io::{DatagramSink, IoError};
use crate::osc::OscDecoder;
use crate::recent::{RecentPacket, RecentRing, MAX_RECENT_PACKETS};

/// Target used until [`ReplayEngine::set_target`] is called.
pub const DEFAULT_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5005);

/// Logical replay time for a video position and a sync offset in milliseconds.
pub fn logical_time(video_time_sec: f64, offset_ms: f64) -> f64 {
    video_time_sec + offset_ms / 1000.0
}

/// Index of the first event with `t >= time`.
pub fn lower_bound(events: &[Event], time: f64) -> usize {
    events.partition_point(|e| e.t < time)
}

/// Outcome of one [`ReplayEngine::tick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickStatus {
    /// Cursor after the tick
    pub sent_index: usize,
    pub total: usize,
    /// Datagrams handed to the transport
    pub sent: usize,
    /// Sends that failed during this tick
    pub send_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<IoError>,
    pub recent_sent: Vec<RecentPacket>,
}

/// Cursor over a time-sorted event list, sending through a [`DatagramSink`].
///
/// Events are expected in non-decreasing `t` order, as produced by
/// [`decode_log`](crate::event::decode_log).
pub struct ReplayEngine<S: DatagramSink> {
    sink: S,
    events: Vec<Event>,
    index: usize,
    target: SocketAddrV4,
    recent: RecentRing<RecentPacket>,
    decoder: OscDecoder,
}

impl<S: DatagramSink> ReplayEngine<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            events: Vec::new(),
            index: 0,
            target: DEFAULT_TARGET,
            recent: RecentRing::new(MAX_RECENT_PACKETS),
            decoder: OscDecoder::default(),
        }
    }

    /// Replace the loaded events and rewind. Returns the event count.
    pub fn load(&mut self, events: Vec<Event>) -> usize {
        self.events = events;
        self.index = 0;
        self.recent.clear();
        self.events.len()
    }

    /// Change the destination of subsequent sends.
    pub fn set_target(&mut self, target: SocketAddrV4) {
        self.target = target;
    }

    /// Move the cursor to the first event at or after `time`.
    pub fn reset_to_time(&mut self, time: f64) -> usize {
        self.index = lower_bound(&self.events, time);
        self.recent.clear();
        self.index
    }

    /// Send every pending event with `t <= current_time`, in stored order.
    ///
    /// A failed send is counted and skipped; it is not retried.
    pub fn tick(&mut self, current_time: f64) -> TickStatus {
        let mut sent = 0;
        let mut send_errors = 0;
        let mut last_error = None;

        while let Some(event) = self.events.get(self.index) {
            if !(event.t <= current_time) {
                break;
            }

            match self.sink.send_to(&event.payload, self.target) {
                Ok(_) => sent += 1,
                Err(e) => {
                    send_errors += 1;
                    last_error = Some(e);
                }
            }

            let seq = self.index as u64 + 1;
            self.recent.push(RecentPacket::from_payload(
                seq,
                event.t,
                &event.payload,
                &self.decoder,
            ));
            self.index += 1;
        }

        TickStatus {
            sent_index: self.index,
            total: self.events.len(),
            sent,
            send_errors,
            last_error,
            recent_sent: self.recent.snapshot(),
        }
    }

    /// Current cursor.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.events.len()
    }

    pub fn recent(&self) -> Vec<RecentPacket> {
        self.recent.snapshot()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<(SocketAddrV4, Vec<u8>)>,
        attempts: usize,
        fail_on: Vec<usize>,
    }

    impl DatagramSink for RecordingSink {
        fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> Result<usize, IoError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.fail_on.contains(&attempt) {
                return Err(IoError::new(101, "Network is unreachable"));
            }
            self.sent.push((target, data.to_vec()));
            Ok(data.len())
        }
    }

    fn sample_events() -> Vec<Event> {
        vec![
            Event::new(0.1, vec![0]),
            Event::new(0.5, vec![1]),
            Event::new(0.5, vec![2]),
            Event::new(1.2, vec![3]),
        ]
    }

    fn engine() -> ReplayEngine<RecordingSink> {
        let mut engine = ReplayEngine::new(RecordingSink::default());
        engine.load(sample_events());
        engine
    }

    #[test]
    fn test_lower_bound() {
        let events = sample_events();

        assert_eq!(lower_bound(&events, 0.5), 1);
        assert_eq!(lower_bound(&events, 1.3), 4);
        assert_eq!(lower_bound(&events, 0.0), 0);
        assert_eq!(lower_bound(&events, 0.1), 0);
        assert_eq!(lower_bound(&[], 1.0), 0);
    }

    #[test]
    fn test_reset_to_time() {
        let mut engine = engine();

        assert_eq!(engine.reset_to_time(0.5), 1);
        assert_eq!(engine.position(), 1);
        assert_eq!(engine.reset_to_time(1.3), 4);
        assert!(engine.is_finished());
        assert_eq!(engine.reset_to_time(0.0), 0);
    }

    #[test]
    fn test_tick_sends_due_events_once() {
        let mut engine = engine();

        let status = engine.tick(0.5);
        assert_eq!(status.sent, 3);
        assert_eq!(status.sent_index, 3);
        assert_eq!(status.total, 4);
        assert_eq!(status.send_errors, 0);

        let payloads: Vec<Vec<u8>> = engine.sink().sent.iter().map(|(_, p)| p.clone()).collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2]]);

        let again = engine.tick(0.5);
        assert_eq!(again.sent, 0);
        assert_eq!(again.sent_index, 3);
    }

    #[test]
    fn test_tick_before_first_event() {
        let mut engine = engine();
        let status = engine.tick(0.05);

        assert_eq!(status.sent, 0);
        assert!(status.recent_sent.is_empty());
    }

    #[test]
    fn test_tick_empty_engine() {
        let mut engine = ReplayEngine::new(RecordingSink::default());
        let status = engine.tick(100.0);

        assert_eq!(status.sent_index, 0);
        assert_eq!(status.total, 0);
    }

    #[test]
    fn test_tick_nan_sends_nothing() {
        let mut engine = engine();
        assert_eq!(engine.tick(f64::NAN).sent, 0);
    }

    #[test]
    fn test_seek_back_replays() {
        let mut engine = engine();
        engine.tick(2.0);
        engine.reset_to_time(0.5);

        let status = engine.tick(0.5);
        assert_eq!(status.sent, 2);
        assert_eq!(engine.sink().sent.len(), 6);
    }

    #[test]
    fn test_set_target_applies_to_later_sends() {
        let mut engine = engine();
        let other = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 9000);

        engine.tick(0.1);
        engine.set_target(other);
        engine.tick(0.5);

        let targets: Vec<SocketAddrV4> = engine.sink().sent.iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, vec![DEFAULT_TARGET, other, other]);
    }

    #[test]
    fn test_send_failure_does_not_stop_tick() {
        let mut engine = ReplayEngine::new(RecordingSink {
            fail_on: vec![1],
            ..Default::default()
        });
        engine.load(sample_events());

        let status = engine.tick(0.5);
        assert_eq!(status.sent, 2);
        assert_eq!(status.send_errors, 1);
        assert_eq!(status.sent_index, 3);
        assert_eq!(status.last_error.map(|e| e.code), Some(101));
    }

    #[test]
    fn test_recent_sent_keeps_last_four() {
        let events: Vec<Event> = (0..6).map(|i| Event::new(i as f64, vec![i as u8])).collect();
        let mut engine = ReplayEngine::new(RecordingSink::default());
        engine.load(events);

        let status = engine.tick(10.0);
        let seqs: Vec<u64> = status.recent_sent.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_load_and_reset_clear_recent() {
        let mut engine = engine();
        engine.tick(0.5);
        assert_eq!(engine.recent().len(), 3);

        engine.reset_to_time(0.0);
        assert!(engine.recent().is_empty());

        engine.tick(0.5);
        assert_eq!(engine.load(vec![Event::new(0.0, vec![9])]), 1);
        assert_eq!(engine.position(), 0);
        assert!(engine.recent().is_empty());
    }

    #[test]
    fn test_logical_time() {
        assert_eq!(logical_time(10.0, 250.0), 10.25);
        assert_eq!(logical_time(1.0, -500.0), 0.5);
    }

    #[test]
    fn test_tick_status_serialization() {
        let mut engine = engine();
        let json = serde_json::to_value(engine.tick(0.1)).unwrap();

        assert_eq!(json["sentIndex"], 1);
        assert_eq!(json["sendErrors"], 0);
        assert!(json.get("lastError").is_none());
        assert_eq!(json["recentSent"][0]["seq"], 1);
    }
}
