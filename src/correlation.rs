//! Matching reassembled responses back to the calls waiting for them.
//!
//! A [`Correlator`] maps each in-flight [`MessageId`] to a single-use
//! delivery slot. The session loop is the only producer; the [`CallHandle`]
//! returned by [`Correlator::register`] is the only consumer. Delivery and
//! abandonment race through one compare-and-swap on a shared state cell, so a
//! value is handed over at most once and the map entry is always removed by
//! whichever side wins.

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{fragment::MessageId, message::ForwardedResponse, metrics};

/// Lifecycle of a pending call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Waiting for a response.
    Pending,
    /// A response was handed to the waiter.
    Delivered,
    /// The waiter gave up (deadline, cancellation or session shutdown).
    Abandoned,
}

impl CallState {
    const fn as_u8(self) -> u8 {
        match self {
            CallState::Pending => 0,
            CallState::Delivered => 1,
            CallState::Abandoned => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Pending,
            1 => CallState::Delivered,
            _ => CallState::Abandoned,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn pending() -> Arc<Self> { Arc::new(Self(AtomicU8::new(CallState::Pending.as_u8()))) }

    fn get(&self) -> CallState { CallState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move from `Pending` to `to`. Only one transition ever succeeds.
    fn settle(&self, to: CallState) -> bool {
        self.0
            .compare_exchange(
                CallState::Pending.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

struct PendingCall<T> {
    state: Arc<StateCell>,
    slot: oneshot::Sender<T>,
}

/// Errors raised while registering or waiting for a call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// Too many calls are already waiting.
    #[error("too many pending calls (limit {limit})")]
    TooManyPending { limit: NonZeroUsize },
    /// A call with this identifier is already waiting.
    #[error("call {0} is already pending")]
    DuplicateId(MessageId),
    /// The deadline elapsed before a response arrived.
    #[error("call {message_id} timed out after {deadline:?}")]
    TimedOut {
        message_id: MessageId,
        deadline: Duration,
    },
    /// The call was abandoned without a response, typically because the
    /// session closed.
    #[error("call {0} was closed before a response arrived")]
    Closed(MessageId),
}

/// Registry of calls waiting for a response.
pub struct Correlator<T = ForwardedResponse> {
    pending: DashMap<MessageId, PendingCall<T>>,
    max_pending: Option<NonZeroUsize>,
}

impl<T> fmt::Debug for Correlator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.len())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl<T> Default for Correlator<T> {
    fn default() -> Self { Self::new(None) }
}

impl<T> Correlator<T> {
    /// Create a correlator, optionally refusing registrations beyond
    /// `max_pending` concurrent calls.
    #[must_use]
    pub fn new(max_pending: Option<NonZeroUsize>) -> Self {
        Self {
            pending: DashMap::new(),
            max_pending,
        }
    }

    /// Register a call and return the handle its caller waits on.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::TooManyPending`] when the cap is reached
    /// and [`CorrelationError::DuplicateId`] when `message_id` is already
    /// waiting.
    pub fn register(
        self: &Arc<Self>,
        message_id: MessageId,
    ) -> Result<CallHandle<T>, CorrelationError> {
        if let Some(limit) = self.max_pending
            && self.pending.len() >= limit.get()
        {
            return Err(CorrelationError::TooManyPending { limit });
        }

        let (slot, receiver) = oneshot::channel();
        let state = StateCell::pending();
        match self.pending.entry(message_id.clone()) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateId(message_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingCall {
                    state: Arc::clone(&state),
                    slot,
                });
            }
        }
        metrics::inc_pending();

        Ok(CallHandle {
            message_id,
            receiver,
            state,
            correlator: Arc::clone(self),
        })
    }

    /// Hand `value` to the call waiting on `message_id`.
    ///
    /// Returns `false` and drops `value` when no call is waiting: unknown
    /// ids, calls that already received a value and calls whose caller gave
    /// up are all treated alike.
    pub fn deliver(&self, message_id: &MessageId, value: T) -> bool {
        let Some((_, call)) = self
            .pending
            .remove_if(message_id, |_, call| call.state.settle(CallState::Delivered))
        else {
            return false;
        };
        metrics::dec_pending();
        // The receiver lives as long as the state was pending; a caller that
        // drops its handle abandons first.
        let _ = call.slot.send(value);
        true
    }

    /// Abandon every pending call, waking their waiters with
    /// [`CorrelationError::Closed`].
    ///
    /// Returns the number of calls abandoned.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.pending.retain(|_, call| {
            let abandoned = call.state.settle(CallState::Abandoned);
            if abandoned {
                closed += 1;
                metrics::dec_pending();
            }
            !abandoned
        });
        closed
    }

    /// Number of calls currently waiting.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Whether a call is waiting on `message_id`.
    #[must_use]
    pub fn is_pending(&self, message_id: &MessageId) -> bool {
        self.pending.contains_key(message_id)
    }

    fn abandon(&self, message_id: &MessageId, state: &Arc<StateCell>) -> bool {
        let removed = self
            .pending
            .remove_if(message_id, |_, call| {
                Arc::ptr_eq(&call.state, state) && call.state.settle(CallState::Abandoned)
            })
            .is_some();
        if removed {
            metrics::dec_pending();
        }
        removed
    }
}

/// The waiting side of a registered call.
///
/// Dropping the handle before a value arrives abandons the call, so late
/// responses are discarded instead of leaking map entries.
pub struct CallHandle<T = ForwardedResponse> {
    message_id: MessageId,
    receiver: oneshot::Receiver<T>,
    state: Arc<StateCell>,
    correlator: Arc<Correlator<T>>,
}

impl<T> fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("message_id", &self.message_id)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl<T> CallHandle<T> {
    /// Identifier the call was registered under.
    #[must_use]
    pub fn message_id(&self) -> &MessageId { &self.message_id }

    /// Current state of the call.
    #[must_use]
    pub fn state(&self) -> CallState { self.state.get() }

    /// Wait for the value, giving up after `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::TimedOut`] when the deadline wins the race
    /// against delivery and [`CorrelationError::Closed`] when the call was
    /// abandoned by someone else.
    pub async fn wait(mut self, deadline: Duration) -> Result<T, CorrelationError> {
        match tokio::time::timeout(deadline, &mut self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CorrelationError::Closed(self.message_id.clone())),
            Err(_) => {
                if self.correlator.abandon(&self.message_id, &self.state) {
                    return Err(CorrelationError::TimedOut {
                        message_id: self.message_id.clone(),
                        deadline,
                    });
                }
                // Delivery settled first; its value is already in flight.
                (&mut self.receiver)
                    .await
                    .map_err(|_| CorrelationError::Closed(self.message_id.clone()))
            }
        }
    }

    /// Give up on the call immediately.
    ///
    /// Returns `true` if the call was still pending.
    pub fn abandon(self) -> bool { self.correlator.abandon(&self.message_id, &self.state) }
}

impl<T> Drop for CallHandle<T> {
    fn drop(&mut self) {
        if self.state.get() == CallState::Pending {
            self.correlator.abandon(&self.message_id, &self.state);
        }
    }
}
