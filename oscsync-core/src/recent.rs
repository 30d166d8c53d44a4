//! Bounded buffer of the most recently seen datagrams, for live display.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::osc::{OscDecoder, OscPreview};

/// Number of packets kept for display.
pub const MAX_RECENT_PACKETS: usize = 4;

/// A captured or replayed datagram with its preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPacket {
    /// Capture counter value or replay index + 1
    pub seq: u64,
    pub t: f64,
    pub size: usize,
    pub data_b64: String,
    pub osc: OscPreview,
}

impl RecentPacket {
    /// Build a packet entry, decoding its preview.
    pub fn from_payload(seq: u64, t: f64, payload: &[u8], decoder: &OscDecoder) -> Self {
        use base64::Engine;

        Self {
            seq,
            t,
            size: payload.len(),
            data_b64: base64::engine::general_purpose::STANDARD.encode(payload),
            osc: decoder.decode(payload),
        }
    }
}

/// Fixed-capacity FIFO; pushing when full evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RecentRing<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Default for RecentRing<T> {
    fn default() -> Self {
        Self::new(MAX_RECENT_PACKETS)
    }
}

impl<T> RecentRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> RecentRing<T> {
    /// Copy of the contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
