//! Per-session throughput accounting.
//!
//! Each [`crate::peer::session::PeerSession`] keeps one of these and updates
//! it as bytes cross the wire, so that the coordinator can report download
//! speed and ETA without re-deriving it from raw byte counters on every tick.

use crate::avg::SlidingAvg;

/// Tracks a single direction's (up or down) payload and protocol byte counts,
/// plus a rolling rate derived from a [`SlidingAvg`].
#[derive(Debug, Default)]
pub struct ThruputCounter {
    /// Total payload (block) bytes transferred.
    payload_bytes: u64,
    /// Total protocol (everything but block payloads) bytes transferred.
    protocol_bytes: u64,
    /// `payload_bytes` as of the last [`Self::tick`], so each tick can derive
    /// the delta transferred since the previous one.
    payload_bytes_at_last_tick: u64,
    /// Rolling average of bytes transferred per tick, used to derive rate.
    avg: SlidingAvg,
}

impl ThruputCounter {
    pub fn add_payload(&mut self, bytes: u64) {
        self.payload_bytes += bytes;
    }

    pub fn add_protocol(&mut self, bytes: u64) {
        self.protocol_bytes += bytes;
    }

    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    pub fn protocol_bytes(&self) -> u64 {
        self.protocol_bytes
    }

    /// Feeds the payload bytes transferred since the last tick into the
    /// rolling average and returns the updated rate in bytes/tick.
    pub fn tick(&mut self) -> u64 {
        let delta = self.payload_bytes - self.payload_bytes_at_last_tick;
        self.payload_bytes_at_last_tick = self.payload_bytes;
        self.avg.update(delta as i64);
        self.avg.mean().max(0) as u64
    }

    pub fn rate(&self) -> u64 {
        self.avg.mean().max(0) as u64
    }
}

/// The up/down throughput counters of a single peer session.
#[derive(Debug, Default)]
pub struct ThruputCounters {
    pub down: ThruputCounter,
    pub up: ThruputCounter,
}

impl ThruputCounters {
    /// Rolls the per-tick rate windows forward from the payload bytes
    /// accumulated since the previous tick. Should be called on a fixed
    /// interval (not once per message), as the sliding average is defined
    /// over ticks, not messages.
    pub fn tick(&mut self) {
        self.down.tick();
        self.up.tick();
    }
}
