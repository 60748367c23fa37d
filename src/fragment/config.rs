//! Configuration used by frame splitting and reassembly.

use std::{num::NonZeroUsize, time::Duration};

use super::{Frame, FrameKind, MessageId, Sequence};
use crate::wire::{WireError, WireFormat};

/// Default ceiling on a single frame payload (16 KiB).
pub const DEFAULT_FRAME_PAYLOAD_CAP: usize = 16 * 1024;
/// Default ceiling on a reassembled logical message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
/// Default lifetime of incomplete reassembly state.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Guard bytes reserved on top of the measured envelope overhead. This
/// absorbs identifiers longer than the locally generated ones.
const ENVELOPE_GUARD_BYTES: usize = 32;

/// Identifier used to measure envelope overhead; matches the length of the
/// UUIDs generated for outbound calls.
const PROBE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Settings that bound frame sizes and reassembly resource usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentationConfig {
    /// Maximum number of logical payload bytes carried by a single frame.
    /// The encoded frame additionally carries its envelope.
    pub frame_payload_cap: NonZeroUsize,
    /// Hard cap on the fully reassembled logical message size.
    pub max_message_size: NonZeroUsize,
    /// Duration after which incomplete reassembly state is evicted.
    pub reassembly_timeout: Duration,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            frame_payload_cap: NonZeroUsize::new(DEFAULT_FRAME_PAYLOAD_CAP)
                .unwrap_or(NonZeroUsize::MIN),
            max_message_size: NonZeroUsize::new(DEFAULT_MAX_MESSAGE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
        }
    }
}

impl FragmentationConfig {
    /// Derive the largest payload cap whose encoded frames fit `frame_budget`.
    ///
    /// `frame_budget` is the largest blob the transport accepts. Returns
    /// `None` when the budget cannot even hold the envelope.
    #[must_use]
    pub fn for_frame_budget(
        frame_budget: usize,
        format: WireFormat,
        max_message_size: NonZeroUsize,
        reassembly_timeout: Duration,
    ) -> Option<Self> {
        let overhead = frame_overhead(format).ok()?;
        let available = frame_budget.checked_sub(overhead + ENVELOPE_GUARD_BYTES)?;
        let cap = match format {
            // Base64 turns every 3 payload bytes into 4 characters.
            WireFormat::Json => available / 4 * 3,
            // Room for the varint length prefix of the payload.
            WireFormat::Bincode => available.saturating_sub(9),
        };
        Some(Self {
            frame_payload_cap: NonZeroUsize::new(cap)?,
            max_message_size,
            reassembly_timeout,
        })
    }

    /// Upper bound on the encoded size of any frame this configuration
    /// produces, including the guard bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the sample frame cannot be encoded.
    pub fn encoded_frame_ceiling(&self, format: WireFormat) -> Result<usize, WireError> {
        let sample = sample_frame(vec![0; self.frame_payload_cap.get()]);
        Ok(sample.encode(format)?.len() + ENVELOPE_GUARD_BYTES)
    }

    /// Whether every frame fits within `frame_budget` once encoded.
    #[must_use]
    pub fn fits_frame_budget(&self, frame_budget: usize, format: WireFormat) -> bool {
        self.encoded_frame_ceiling(format)
            .is_ok_and(|ceiling| ceiling <= frame_budget)
    }
}

/// Encoded size of a frame envelope with an empty payload.
///
/// # Errors
///
/// Returns a [`WireError`] if the sample frame cannot be encoded.
pub fn frame_overhead(format: WireFormat) -> Result<usize, WireError> {
    Ok(sample_frame(Vec::new()).encode(format)?.len())
}

fn sample_frame(payload: Vec<u8>) -> Frame {
    Frame::new(
        MessageId::new(PROBE_ID),
        FrameKind::Response,
        Sequence::new(u32::MAX),
        false,
        payload,
    )
}
