//! The wire unit exchanged over the peer link.
//!
//! A [`Frame`] carries one slice of a logical message together with enough
//! metadata to put the message back together on the other side. Field names
//! on the wire are `id`, `type`, `sequence`, `is_last` and `payload`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{MessageId, Sequence};
use crate::wire::{WireError, WireFormat, byte_field};

/// Which half of an exchange a logical message belongs to.
///
/// The kind partitions reassembly state, so a request and a response sharing
/// one [`MessageId`] never mix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Frames of a tunnelled request, travelling initiator to responder.
    Request,
    /// Frames of a tunnelled response, travelling responder to initiator.
    Response,
}

impl FrameKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Metadata and payload for a single frame.
///
/// # Examples
///
/// ```
/// use tunnelwire::fragment::{Frame, FrameKind, MessageId, Sequence};
/// let frame = Frame::new(MessageId::new("a"), FrameKind::Request, Sequence::zero(), true, vec![1]);
/// assert!(frame.is_last());
/// assert_eq!(frame.payload(), &[1]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "id")]
    message_id: MessageId,
    #[serde(rename = "type")]
    kind: FrameKind,
    sequence: Sequence,
    is_last: bool,
    #[serde(with = "byte_field")]
    payload: Vec<u8>,
}

impl Frame {
    /// Construct a new frame.
    #[must_use]
    pub fn new(
        message_id: MessageId,
        kind: FrameKind,
        sequence: Sequence,
        is_last: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            kind,
            sequence,
            is_last,
            payload,
        }
    }

    /// Identifier of the logical message this frame belongs to.
    #[must_use]
    pub fn message_id(&self) -> &MessageId { &self.message_id }

    /// Kind of the logical message.
    #[must_use]
    pub const fn kind(&self) -> FrameKind { self.kind }

    /// Position of the frame within its message.
    #[must_use]
    pub const fn sequence(&self) -> Sequence { self.sequence }

    /// Whether this is the terminal frame.
    #[must_use]
    pub const fn is_last(&self) -> bool { self.is_last }

    /// Borrow the frame payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { self.payload.as_slice() }

    /// Consume the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }

    /// Encode the frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if serialization fails.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, WireError> { format.encode(self) }

    /// Decode a frame received from the transport.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when `bytes` is not a well-formed frame.
    pub fn decode(format: WireFormat, bytes: &[u8]) -> Result<Self, WireError> {
        format.decode(bytes)
    }
}
