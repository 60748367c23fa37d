//! Error types emitted by the splitting and reassembly layer.
//!
//! Both directions stay independent of the transport so the session loop can
//! decide which failures are logged and which surface to callers.

use std::num::NonZeroUsize;

use thiserror::Error;

use super::{FrameKind, MessageId, Sequence};

/// Errors produced while splitting outbound payloads.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    /// The payload needs more frames than a [`Sequence`] can number.
    #[error("frame sequence overflow after {last}")]
    SequenceOverflow { last: Sequence },
}

/// Protocol violations detected while reassembling inbound frames.
///
/// Any of these discards the partial message; the peer is never told.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// A frame arrived numbered past the already known terminal frame.
    #[error("{kind} {message_id}: sequence {found} is beyond terminal sequence {terminal}")]
    BeyondTerminal {
        message_id: MessageId,
        kind: FrameKind,
        terminal: Sequence,
        found: Sequence,
    },
    /// Two different frames claimed to be the last one.
    #[error("{kind} {message_id}: conflicting terminal sequences {first} and {second}")]
    ConflictingTerminal {
        message_id: MessageId,
        kind: FrameKind,
        first: Sequence,
        second: Sequence,
    },
    /// The reassembled payload would exceed the configured cap.
    #[error("{kind} {message_id}: message of {attempted} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        message_id: MessageId,
        kind: FrameKind,
        attempted: usize,
        limit: NonZeroUsize,
    },
}
