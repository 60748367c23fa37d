//! Metric helpers for `tunnelwire`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::fragment::FrameKind;

/// Name of the counter tracking frames crossing the peer link.
pub const FRAMES_TOTAL: &str = "tunnelwire_frames_total";
/// Name of the counter tracking completed reassemblies.
pub const MESSAGES_REASSEMBLED: &str = "tunnelwire_messages_reassembled_total";
/// Name of the counter tracking calls that hit their deadline.
pub const CALLS_TIMED_OUT: &str = "tunnelwire_calls_timed_out_total";
/// Name of the counter tracking responses that arrived with nobody waiting.
pub const LATE_RESPONSES: &str = "tunnelwire_late_responses_total";
/// Name of the counter tracking partial messages evicted by the sweep.
pub const REASSEMBLY_EVICTIONS: &str = "tunnelwire_reassembly_evictions_total";
/// Name of the counter tracking locally handled errors.
pub const ERRORS_TOTAL: &str = "tunnelwire_errors_total";
/// Name of the gauge tracking calls waiting for a response.
pub const PENDING_CALLS: &str = "tunnelwire_pending_calls";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from the peer.
    Inbound,
    /// Frames sent to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a completed reassembly.
pub fn inc_reassembled(kind: FrameKind) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_REASSEMBLED, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a call abandoned at its deadline.
pub fn inc_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(CALLS_TIMED_OUT).increment(1);
}

/// Record a response dropped because nobody was waiting for it.
pub fn inc_late_responses() {
    #[cfg(feature = "metrics")]
    counter!(LATE_RESPONSES).increment(1);
}

/// Record partial messages evicted by the expiry sweep.
pub fn add_evictions(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(REASSEMBLY_EVICTIONS).increment(u64::try_from(count).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Increment the pending calls gauge.
pub fn inc_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_CALLS).increment(1.0);
}

/// Decrement the pending calls gauge.
pub fn dec_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_CALLS).decrement(1.0);
}
