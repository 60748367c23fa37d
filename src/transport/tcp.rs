//! TCP link framed with a 4-byte length prefix.
//!
//! Each blob travels as one length-delimited record. Writes go through an
//! async mutex around the sink so concurrent senders never interleave
//! partial records and the frames of one message keep their send order.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use log::info;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{FrameTransport, Link, TransportError, check_frame_size, handshake};

type FramedTcp = Framed<TcpStream, LengthDelimitedCodec>;

/// Length-delimited codec refusing records larger than `max_frame_size`.
#[must_use]
pub fn codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_size)
        .new_codec()
}

/// Sending half of a TCP link.
pub struct TcpTransport {
    sink: Mutex<SplitSink<FramedTcp, Bytes>>,
    max_frame_size: usize,
    peer_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("max_frame_size", &self.max_frame_size)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Address of the remote peer, if the socket reported one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        check_frame_size(frame.len(), self.max_frame_size)?;
        let mut sink = self.sink.lock().await;
        sink.send(frame).await?;
        Ok(())
    }

    fn max_frame_size(&self) -> usize { self.max_frame_size }
}

/// Turn an already handshaken connection into a [`Link`].
#[must_use]
pub fn into_link(framed: FramedTcp, max_frame_size: usize) -> Link {
    let peer_addr = framed.get_ref().peer_addr().ok();
    let (sink, stream) = framed.split();
    Link {
        outbound: Arc::new(TcpTransport {
            sink: Mutex::new(sink),
            max_frame_size,
            peer_addr,
        }),
        inbound: Box::pin(stream.map(|record| {
            record
                .map(BytesMut::freeze)
                .map_err(TransportError::from)
        })),
    }
}

/// Dial `addr` and ask for the endpoint named `target`.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the connection fails and
/// [`TransportError::Handshake`] if the endpoint refuses the link.
pub async fn connect(
    addr: SocketAddr,
    target: &str,
    max_frame_size: usize,
    handshake_timeout: Duration,
) -> Result<Link, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, codec(max_frame_size));
    handshake::initiate(&mut framed, target, handshake_timeout).await?;
    info!("link established: target={target}, addr={addr}");
    Ok(into_link(framed, max_frame_size))
}

/// Complete the listening side of the handshake on an accepted socket.
///
/// # Errors
///
/// Returns [`TransportError::Handshake`] if the dialler asks for another
/// endpoint or stays silent past `handshake_timeout`.
pub async fn accept(
    stream: TcpStream,
    local_id: &str,
    max_frame_size: usize,
    handshake_timeout: Duration,
) -> Result<Link, TransportError> {
    stream.set_nodelay(true)?;
    let peer_addr = stream.peer_addr().ok();
    let mut framed = Framed::new(stream, codec(max_frame_size));
    handshake::respond(&mut framed, local_id, handshake_timeout).await?;
    info!("link accepted: local_id={local_id}, peer_addr={peer_addr:?}");
    Ok(into_link(framed, max_frame_size))
}
