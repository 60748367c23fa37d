//! The per-link dispatch loop shared by both tunnel roles.
//!
//! A [`Session`] owns the sending half of a link and the injected
//! [`SessionState`]. [`Session::run`] is the single reader of the inbound
//! half: every blob is handed to its own task, which decodes the frame,
//! feeds the reassembler and, once a message is complete, either delivers a
//! response to the waiting call or executes a request through the configured
//! [`Downstream`] and sends the answer back under the same id.
//!
//! The initiator side enters through [`Session::call`], which registers a
//! pending call, splits the request into frames and waits for the correlated
//! response up to a deadline.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::select;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    correlation::{CorrelationError, Correlator},
    fragment::{
        FragmentationConfig,
        Frame,
        FrameKind,
        MessageId,
        ReassembledMessage,
        Reassembler,
        SplitError,
        Splitter,
    },
    http::Downstream,
    message::{ForwardedRequest, ForwardedResponse},
    metrics::{self, Direction},
    transport::{FrameStream, FrameTransport, TransportError},
    wire::{WireError, WireFormat},
};

mod sweep;

pub use sweep::DEFAULT_SWEEP_INTERVAL;

/// Shared mutable state of one link: partial messages and waiting calls.
///
/// Passed in explicitly so independent sessions never share maps.
#[derive(Debug)]
pub struct SessionState {
    /// Partially received messages.
    pub reassembler: Reassembler,
    /// Calls waiting for a response.
    pub correlator: Arc<Correlator>,
}

impl SessionState {
    /// Build fresh state from the fragmentation limits and an optional cap on
    /// concurrent calls.
    #[must_use]
    pub fn new(fragmentation: &FragmentationConfig, max_pending: Option<NonZeroUsize>) -> Self {
        Self {
            reassembler: Reassembler::new(
                fragmentation.max_message_size,
                fragmentation.reassembly_timeout,
            ),
            correlator: Arc::new(Correlator::new(max_pending)),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self { Self::new(&FragmentationConfig::default(), None) }
}

/// Knobs for a [`Session`].
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Encoding used for frames and logical messages.
    pub wire_format: WireFormat,
    /// Largest payload slice carried by one outbound frame.
    pub frame_payload_cap: NonZeroUsize,
    /// How often expired partial messages are swept.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            frame_payload_cap: FragmentationConfig::default().frame_payload_cap,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Why a tunneled call produced no response.
#[derive(Debug, Error)]
pub enum CallError {
    /// The request could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] WireError),
    /// The request could not be split into frames.
    #[error(transparent)]
    Split(#[from] SplitError),
    /// A frame could not be sent; the whole message is lost.
    #[error("failed to send frame: {0}")]
    Transport(#[from] TransportError),
    /// No response arrived before the deadline.
    #[error("call {message_id} timed out after {deadline:?}")]
    Timeout {
        message_id: MessageId,
        deadline: Duration,
    },
    /// The link is down.
    #[error("peer is not connected")]
    Disconnected,
    /// The call could not be registered.
    #[error(transparent)]
    Correlation(CorrelationError),
}

/// One end of an established link.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn FrameTransport>,
    state: Arc<SessionState>,
    handler: Option<Arc<dyn Downstream>>,
    splitter: Splitter,
    config: SessionConfig,
    closed: AtomicBool,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("handler", &self.inner.handler.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session sending through `transport`.
    ///
    /// Sessions with a `handler` act as responders and execute inbound
    /// requests; sessions without one ignore request frames.
    #[must_use]
    pub fn new(
        transport: Arc<dyn FrameTransport>,
        state: Arc<SessionState>,
        handler: Option<Arc<dyn Downstream>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                state,
                handler,
                splitter: Splitter::new(config.frame_payload_cap),
                config,
                closed: AtomicBool::new(false),
                stop: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Shared state backing this session.
    #[must_use]
    pub fn state(&self) -> &Arc<SessionState> { &self.inner.state }

    /// Whether [`Session::run`] has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Read `inbound` until the peer closes the link or `shutdown` fires.
    ///
    /// Each blob is processed on its own task. When the loop ends the session
    /// is marked closed, downstream requests still executing are dropped,
    /// in-flight tasks are awaited and every call still waiting is woken with
    /// [`CallError::Disconnected`].
    pub async fn run(&self, mut inbound: FrameStream, shutdown: CancellationToken) {
        self.inner.tracker.spawn(sweep::sweep_expired(
            Arc::clone(&self.inner.state),
            self.inner.config.sweep_interval,
            self.inner.stop.clone(),
        ));

        loop {
            select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("session shutting down");
                    break;
                }
                next = inbound.next() => match next {
                    Some(Ok(blob)) => {
                        metrics::inc_frames(Direction::Inbound);
                        let session = self.clone();
                        self.inner.tracker.spawn(async move { session.handle_blob(blob).await });
                    }
                    Some(Err(err)) => {
                        warn!("link read failed: error={err}");
                        metrics::inc_errors();
                        break;
                    }
                    None => {
                        info!("peer closed the link");
                        break;
                    }
                },
            }
        }

        self.inner.closed.store(true, Ordering::Release);
        self.inner.stop.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.abandon_pending();
    }

    /// Tunnel `request` and wait up to `deadline` for its response.
    ///
    /// An empty request id is replaced by a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Disconnected`] when the link is down,
    /// [`CallError::Timeout`] when the deadline elapses, and the encode,
    /// split, transport or correlation failure otherwise. No attempt is
    /// retried.
    pub async fn call(
        &self,
        mut request: ForwardedRequest,
        deadline: Duration,
    ) -> Result<ForwardedResponse, CallError> {
        if self.is_closed() {
            return Err(CallError::Disconnected);
        }
        if request.id.as_str().is_empty() {
            request.id = MessageId::generate();
        }
        let message_id = request.id.clone();
        let payload = request.encode(self.inner.config.wire_format)?;

        let handle = self
            .inner
            .state
            .correlator
            .register(message_id.clone())
            .map_err(CallError::Correlation)?;
        // `run` may have closed the session between the check and the insert.
        if self.is_closed() {
            handle.abandon();
            return Err(CallError::Disconnected);
        }

        if let Err(err) = self
            .send_message(&message_id, FrameKind::Request, &payload)
            .await
        {
            handle.abandon();
            metrics::inc_errors();
            warn!("failed to send request: id={message_id}, error={err}");
            return Err(err);
        }
        debug!(
            "request sent: id={message_id}, method={}, path={}",
            request.method, request.path
        );

        match handle.wait(deadline).await {
            Ok(response) => Ok(response),
            Err(CorrelationError::TimedOut {
                message_id,
                deadline,
            }) => {
                metrics::inc_timeouts();
                tracing::warn!(id = %message_id, ?deadline, "call timed out");
                Err(CallError::Timeout {
                    message_id,
                    deadline,
                })
            }
            Err(CorrelationError::Closed(_)) => Err(CallError::Disconnected),
            Err(err) => Err(CallError::Correlation(err)),
        }
    }

    fn abandon_pending(&self) {
        let abandoned = self.inner.state.correlator.close_all();
        if abandoned > 0 {
            info!("abandoned pending calls on close: count={abandoned}");
        }
    }

    async fn send_message(
        &self,
        message_id: &MessageId,
        kind: FrameKind,
        payload: &[u8],
    ) -> Result<(), CallError> {
        let format = self.inner.config.wire_format;
        let batch = self.inner.splitter.split(message_id, kind, payload)?;
        for frame in batch {
            let encoded = frame.encode(format)?;
            self.inner.transport.send(Bytes::from(encoded)).await?;
            metrics::inc_frames(Direction::Outbound);
        }
        Ok(())
    }

    async fn handle_blob(&self, blob: Bytes) {
        let frame = match Frame::decode(self.inner.config.wire_format, &blob) {
            Ok(frame) => frame,
            Err(err) => {
                metrics::inc_errors();
                warn!("dropping undecodable frame: bytes={}, error={err}", blob.len());
                return;
            }
        };
        if frame.kind() == FrameKind::Request && self.inner.handler.is_none() {
            debug!("ignoring request frame: id={}", frame.message_id());
            return;
        }

        let message = match self.inner.state.reassembler.accept(frame) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                metrics::inc_errors();
                warn!("discarding partial message: error={err}");
                return;
            }
        };
        metrics::inc_reassembled(message.kind());
        debug!(
            "message reassembled: id={}, kind={}, bytes={}",
            message.message_id(),
            message.kind(),
            message.payload().len()
        );

        match message.kind() {
            FrameKind::Response => self.deliver_response(&message),
            FrameKind::Request => {
                if let Some(handler) = &self.inner.handler {
                    self.serve_request(handler.as_ref(), &message).await;
                }
            }
        }
    }

    fn deliver_response(&self, message: &ReassembledMessage) {
        let response: ForwardedResponse = match message.decode(self.inner.config.wire_format) {
            Ok(response) => response,
            Err(err) => {
                metrics::inc_errors();
                warn!(
                    "dropping undecodable response: id={}, error={err}",
                    message.message_id()
                );
                return;
            }
        };
        if !self
            .inner
            .state
            .correlator
            .deliver(message.message_id(), response)
        {
            metrics::inc_late_responses();
            debug!(
                "dropping response nobody is waiting for: id={}",
                message.message_id()
            );
        }
    }

    async fn serve_request(&self, handler: &dyn Downstream, message: &ReassembledMessage) {
        let format = self.inner.config.wire_format;
        let request: ForwardedRequest = match message.decode(format) {
            Ok(request) => request,
            Err(err) => {
                metrics::inc_errors();
                warn!(
                    "dropping undecodable request: id={}, error={err}",
                    message.message_id()
                );
                return;
            }
        };

        let message_id = message.message_id().clone();
        let mut response = select! {
            response = handler.execute(request) => response,
            () = self.inner.stop.cancelled() => {
                info!("session closed before downstream answered: id={message_id}");
                return;
            }
        };
        response.id = message_id.clone();

        let payload = match response.encode(format) {
            Ok(payload) => payload,
            Err(err) => {
                metrics::inc_errors();
                warn!("failed to encode response: id={message_id}, error={err}");
                return;
            }
        };
        match self
            .send_message(&message_id, FrameKind::Response, &payload)
            .await
        {
            Ok(()) => debug!(
                "response sent: id={message_id}, status={}",
                response.status_code
            ),
            Err(err) => {
                metrics::inc_errors();
                warn!("failed to send response: id={message_id}, error={err}");
            }
        }
    }
}

#[cfg(test)]
mod tests;
