//! Event records and the JSON Lines log format.
//!
//! Each captured datagram is persisted as one line:
//!
//! ```text
//! {"t":1.234567,"data_b64":"L2EvYgAAAAAsaQAAAAAAKg=="}
//! ```
//!
//! `t` is seconds since the session started, `data_b64` the raw payload in
//! standard base64. Lines are independent, so a log truncated mid-write loses
//! at most its final record.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// One timestamped datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds relative to session start
    pub t: f64,
    /// Raw datagram bytes
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(t: f64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            t,
            payload: payload.into(),
        }
    }

    /// Payload encoded as standard base64.
    pub fn data_b64(&self) -> String {
        BASE64.encode(&self.payload)
    }
}

#[derive(Serialize)]
struct RecordOut<'a> {
    t: f64,
    data_b64: &'a str,
}

#[derive(Deserialize)]
struct RecordIn {
    t: f64,
    data_b64: String,
}

/// Encode one event as a single JSON line (without the trailing newline).
///
/// Fails only for a NaN or infinite timestamp, which JSON cannot carry.
pub fn encode_record(event: &Event) -> Result<String, RecordError> {
    if !event.t.is_finite() {
        return Err(RecordError::NonFiniteTime);
    }
    let data_b64 = event.data_b64();
    let line = serde_json::to_string(&RecordOut {
        t: event.t,
        data_b64: &data_b64,
    })?;
    Ok(line)
}

/// Decode one JSON line. Unknown fields are ignored.
pub fn decode_record(line: &str) -> Result<Event, RecordError> {
    let record: RecordIn = serde_json::from_str(line)?;
    if !record.t.is_finite() {
        return Err(RecordError::NonFiniteTime);
    }
    let payload = BASE64.decode(record.data_b64.as_bytes())?;
    Ok(Event::new(record.t, payload))
}

/// Result of decoding a whole log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedLog {
    /// Valid events, sorted ascending by `t`
    pub events: Vec<Event>,
    /// Number of non-blank lines that failed to decode
    pub skipped: usize,
}

/// Decode a full log. Blank lines are ignored, bad lines are dropped and
/// counted, and the surviving events are sorted by time.
pub fn decode_log(content: &str) -> DecodedLog {
    let mut log = DecodedLog::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_record(line) {
            Ok(event) => log.events.push(event),
            Err(_) => log.skipped += 1,
        }
    }

    sort_events(&mut log.events);
    log
}

/// Stable sort by timestamp; events with equal `t` keep their order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap_or(std::cmp::Ordering::Equal));
}
