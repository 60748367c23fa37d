//! Frame transports connecting the two tunnel roles.
//!
//! A transport moves opaque byte blobs between peers in order and without
//! loss. Each blob carries exactly one encoded [`Frame`](crate::fragment::Frame)
//! and must not exceed [`FrameTransport::max_frame_size`]. The session loop
//! holds the sending half behind [`FrameTransport`] and consumes the receiving
//! half as a [`FrameStream`].

use std::{io, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

pub mod handshake;
pub mod memory;
pub mod tcp;

pub use handshake::{HandshakeError, HandshakeMessage};

/// Inbound blobs in the order the peer sent them.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Errors raised by frame transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The blob exceeds the transport's ceiling.
    #[error("frame of {size} bytes exceeds the {limit} byte transport limit")]
    FrameTooLarge { size: usize, limit: usize },
    /// The peer went away.
    #[error("transport closed")]
    Closed,
    /// Underlying socket failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
    /// The link could not be established.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Sending half of an ordered, reliable frame channel.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Transmit one blob. Blobs are delivered in the order `send` completes.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Largest blob the transport accepts.
    fn max_frame_size(&self) -> usize;
}

/// Reject blobs over `limit` before they reach the wire.
pub(crate) fn check_frame_size(size: usize, limit: usize) -> Result<(), TransportError> {
    if size > limit {
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    Ok(())
}

/// Both halves of an established link.
pub struct Link {
    /// Sending half, shareable across tasks.
    pub outbound: Arc<dyn FrameTransport>,
    /// Receiving half, owned by the session's single reader.
    pub inbound: FrameStream,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("max_frame_size", &self.outbound.max_frame_size())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Split the link into its halves.
    #[must_use]
    pub fn into_parts(self) -> (Arc<dyn FrameTransport>, FrameStream) {
        (self.outbound, self.inbound)
    }
}
