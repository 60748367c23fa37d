//! In-process transport pair.
//!
//! Useful for tests and for running both roles inside one process. Frames
//! are queued on bounded channels so a slow reader applies backpressure to
//! the sender.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::sync::mpsc;

use super::{FrameStream, FrameTransport, Link, TransportError, check_frame_size};

/// Frames buffered per direction before `send` waits.
pub const CHANNEL_CAPACITY: usize = 64;

/// Sending half of an in-memory link.
#[derive(Debug)]
pub struct MemoryTransport {
    peer: mpsc::Sender<Bytes>,
    max_frame_size: usize,
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        check_frame_size(frame.len(), self.max_frame_size)?;
        self.peer
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn max_frame_size(&self) -> usize { self.max_frame_size }
}

/// Create two connected links. Frames sent on one arrive on the other in
/// order. Dropping every clone of a link's outbound half ends the peer's
/// inbound stream.
#[must_use]
pub fn pair(max_frame_size: usize) -> (Link, Link) {
    let (to_b, from_a) = mpsc::channel(CHANNEL_CAPACITY);
    let (to_a, from_b) = mpsc::channel(CHANNEL_CAPACITY);
    let a = Link {
        outbound: Arc::new(MemoryTransport {
            peer: to_b,
            max_frame_size,
        }),
        inbound: receiver_stream(from_b),
    };
    let b = Link {
        outbound: Arc::new(MemoryTransport {
            peer: to_a,
            max_frame_size,
        }),
        inbound: receiver_stream(from_a),
    };
    (a, b)
}

fn receiver_stream(rx: mpsc::Receiver<Bytes>) -> FrameStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok(frame), rx))
    }))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (a, mut b) = pair(16);
        for n in 0u8..5 {
            a.outbound.send(Bytes::from(vec![n])).await.expect("send");
        }
        for n in 0u8..5 {
            let frame = b.inbound.next().await.expect("frame").expect("ok");
            assert_eq!(frame.as_ref(), &[n]);
        }
    }

    #[tokio::test]
    async fn oversize_frames_are_rejected() {
        let (a, _b) = pair(4);
        let err = a
            .outbound
            .send(Bytes::from_static(b"too long"))
            .await
            .expect_err("oversize frame must fail");
        assert!(matches!(
            err,
            TransportError::FrameTooLarge { size: 8, limit: 4 }
        ));
    }

    #[tokio::test]
    async fn dropping_a_link_ends_the_peer_stream() {
        let (a, mut b) = pair(16);
        drop(a);
        assert!(b.inbound.next().await.is_none());
        let err = b
            .outbound
            .send(Bytes::from_static(b"x"))
            .await
            .expect_err("peer is gone");
        assert!(matches!(err, TransportError::Closed));
    }
}
