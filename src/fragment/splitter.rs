//! Outbound helper that slices logical messages into transport frames.
//!
//! [`Splitter`] is stateless: it only knows the payload ceiling. Callers own
//! the message identifier and are responsible for sending the frames in the
//! order they are produced.

use std::num::NonZeroUsize;

use super::{Frame, FrameKind, MessageId, Sequence, SplitError};

/// Splits byte payloads into frame-sized slices.
#[derive(Clone, Copy, Debug)]
pub struct Splitter {
    max_frame_size: NonZeroUsize,
}

impl Splitter {
    /// Create a splitter that caps frame payloads at `max_frame_size` bytes.
    #[must_use]
    pub const fn new(max_frame_size: NonZeroUsize) -> Self { Self { max_frame_size } }

    /// Return the maximum frame payload size in bytes.
    #[must_use]
    pub const fn max_frame_size(&self) -> NonZeroUsize { self.max_frame_size }

    /// Split `payload` into frames tagged with `message_id` and `kind`.
    ///
    /// Always yields at least one frame; an empty payload becomes a single
    /// zero-length terminal frame.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::SequenceOverflow`] if more than `u32::MAX + 1`
    /// frames are required.
    pub fn split(
        &self,
        message_id: &MessageId,
        kind: FrameKind,
        payload: impl AsRef<[u8]>,
    ) -> Result<FrameBatch, SplitError> {
        let frames = self.build_frames(message_id, kind, payload.as_ref())?;
        Ok(FrameBatch::new(message_id.clone(), kind, frames))
    }

    fn build_frames(
        &self,
        message_id: &MessageId,
        kind: FrameKind,
        payload: &[u8],
    ) -> Result<Vec<Frame>, SplitError> {
        if payload.is_empty() {
            return Ok(vec![Frame::new(
                message_id.clone(),
                kind,
                Sequence::zero(),
                true,
                Vec::new(),
            )]);
        }

        let max = self.max_frame_size.get();
        let mut frames = Vec::with_capacity(payload.len().div_ceil(max));
        let mut sequence = Sequence::zero();

        for (position, chunk) in payload.chunks(max).enumerate() {
            if position > 0 {
                sequence = sequence
                    .checked_increment()
                    .ok_or(SplitError::SequenceOverflow { last: sequence })?;
            }
            let is_last = (position + 1) * max >= payload.len();
            frames.push(Frame::new(
                message_id.clone(),
                kind,
                sequence,
                is_last,
                chunk.to_vec(),
            ));
        }

        Ok(frames)
    }
}

/// Frames produced for a single logical message, in send order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBatch {
    message_id: MessageId,
    kind: FrameKind,
    frames: Vec<Frame>,
}

impl FrameBatch {
    fn new(message_id: MessageId, kind: FrameKind, frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty(), "frame batches must not be empty");
        Self {
            message_id,
            kind,
            frames,
        }
    }

    /// Return the [`MessageId`] shared by all frames.
    #[must_use]
    pub fn message_id(&self) -> &MessageId { &self.message_id }

    /// Return the kind shared by all frames.
    #[must_use]
    pub const fn kind(&self) -> FrameKind { self.kind }

    /// Return the frames as a slice.
    #[must_use]
    pub fn frames(&self) -> &[Frame] { self.frames.as_slice() }

    /// Number of frames in the batch.
    #[expect(
        clippy::len_without_is_empty,
        reason = "batches are guaranteed non-empty"
    )]
    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    /// Whether the logical message required more than one frame.
    #[must_use]
    pub fn is_fragmented(&self) -> bool { self.len() > 1 }

    /// Consume the batch, returning all frames.
    #[must_use]
    pub fn into_frames(self) -> Vec<Frame> { self.frames }
}

impl IntoIterator for FrameBatch {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter { self.frames.into_iter() }
}
