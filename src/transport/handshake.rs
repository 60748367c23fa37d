//! Link handshake between the gateway and the endpoint it dials.
//!
//! The dialling side names the endpoint it wants in a
//! [`HandshakeMessage::Hello`]. The listening side answers
//! [`HandshakeMessage::Welcome`] when the name matches its own identity and
//! [`HandshakeMessage::Rejected`] otherwise. Both directions are bounded by a
//! timeout so a silent peer cannot hold a half-open link forever. Handshake
//! records are always JSON, whatever format the frames use afterwards.

use std::{io, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::wire::{WireError, WireFormat};

/// Time allowed for the whole exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Records exchanged before any frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandshakeMessage {
    /// Sent by the dialler, naming the endpoint it wants to reach.
    Hello { peer_id: String },
    /// The listener accepted the link.
    Welcome { peer_id: String },
    /// The listener refused the link and is about to close it.
    Rejected { reason: String },
}

/// Errors raised while establishing a link.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),
    #[error("peer rejected the link: {0}")]
    Rejected(String),
    #[error("peer {0:?} is not served here")]
    UnknownPeer(String),
    #[error("expected to reach {wanted:?} but {found:?} answered")]
    WrongPeer { wanted: String, found: String },
    #[error("unexpected handshake record: {0:?}")]
    Unexpected(HandshakeMessage),
    #[error("peer closed the link during the handshake")]
    Closed,
    #[error("malformed handshake record: {0}")]
    Wire(#[from] WireError),
    #[error("handshake i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Dial side: ask for `target` and wait for the verdict.
///
/// # Errors
///
/// Returns a [`HandshakeError`] if the peer rejects the link, answers with
/// the wrong identity, closes early or stays silent past `limit`.
pub async fn initiate<T>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
    target: &str,
    limit: Duration,
) -> Result<(), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        write_message(
            framed,
            &HandshakeMessage::Hello {
                peer_id: target.to_owned(),
            },
        )
        .await?;
        match read_message(framed).await? {
            HandshakeMessage::Welcome { peer_id } if peer_id == target => Ok(()),
            HandshakeMessage::Welcome { peer_id } => Err(HandshakeError::WrongPeer {
                wanted: target.to_owned(),
                found: peer_id,
            }),
            HandshakeMessage::Rejected { reason } => Err(HandshakeError::Rejected(reason)),
            other @ HandshakeMessage::Hello { .. } => Err(HandshakeError::Unexpected(other)),
        }
    };
    timeout(limit, exchange)
        .await
        .map_err(|_| HandshakeError::TimedOut(limit))?
}

/// Listen side: accept a dialler asking for `local_id`.
///
/// A mismatched or malformed greeting is answered with
/// [`HandshakeMessage::Rejected`] before the error is returned.
///
/// # Errors
///
/// Returns a [`HandshakeError`] if the greeting names another peer, is not a
/// hello, or does not arrive within `limit`.
pub async fn respond<T>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
    local_id: &str,
    limit: Duration,
) -> Result<String, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        let verdict = match read_message(framed).await? {
            HandshakeMessage::Hello { peer_id } if peer_id == local_id => Ok(peer_id),
            HandshakeMessage::Hello { peer_id } => Err(HandshakeError::UnknownPeer(peer_id)),
            other => Err(HandshakeError::Unexpected(other)),
        };
        match verdict {
            Ok(peer_id) => {
                write_message(
                    framed,
                    &HandshakeMessage::Welcome {
                        peer_id: peer_id.clone(),
                    },
                )
                .await?;
                debug!("handshake accepted: peer_id={peer_id}");
                Ok(peer_id)
            }
            Err(err) => {
                warn!("handshake rejected: error={err}");
                let reason = err.to_string();
                // The peer may already be gone; the original error matters more.
                let _ = write_message(framed, &HandshakeMessage::Rejected { reason }).await;
                Err(err)
            }
        }
    };
    timeout(limit, exchange)
        .await
        .map_err(|_| HandshakeError::TimedOut(limit))?
}

async fn write_message<T>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
    message: &HandshakeMessage,
) -> Result<(), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = WireFormat::Json.encode(message)?;
    framed.send(Bytes::from(bytes)).await?;
    Ok(())
}

async fn read_message<T>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
) -> Result<HandshakeMessage, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = framed.next().await.ok_or(HandshakeError::Closed)??;
    Ok(WireFormat::Json.decode(&bytes)?)
}
