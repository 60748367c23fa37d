//! Inbound helper that stitches frames back into complete messages.
//!
//! [`Reassembler`] mirrors the outbound [`Splitter`](crate::fragment::Splitter)
//! by collecting frame payloads keyed by kind and
//! [`MessageId`](crate::fragment::MessageId). It is shared by every task
//! handling inbound frames, so it uses two levels of locking: the outer map
//! guards creation and removal of per-message state, and each state carries
//! its own mutex for in-place updates. Completed messages leave a tombstone
//! behind so late duplicates cannot start a second assembly. Stale partials
//! and tombstones are purged after a fixed timeout.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;

use super::{
    Frame,
    FrameKind,
    MessageId,
    ReassemblyError,
    state::{Progress, ReassemblyState},
};
use crate::wire::{WireError, WireFormat};

type SlotKey = (FrameKind, MessageId);

#[derive(Debug)]
enum Slot {
    Assembling(Arc<Mutex<ReassemblyState>>),
    Completed { at: Instant },
}

/// Container for a fully re-assembled message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledMessage {
    message_id: MessageId,
    kind: FrameKind,
    payload: Vec<u8>,
}

impl ReassembledMessage {
    /// Construct a new [`ReassembledMessage`].
    #[must_use]
    pub fn new(message_id: MessageId, kind: FrameKind, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            kind,
            payload,
        }
    }

    /// Identifier shared by the frames that formed this message.
    #[must_use]
    pub fn message_id(&self) -> &MessageId { &self.message_id }

    /// Kind shared by the frames that formed this message.
    #[must_use]
    pub const fn kind(&self) -> FrameKind { self.kind }

    /// Borrow the re-assembled payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] { self.payload.as_slice() }

    /// Consume the message, returning the owned payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }

    /// Decode the payload into a logical record.
    ///
    /// # Errors
    ///
    /// Returns any [`WireError`] raised while deserialising the payload.
    pub fn decode<M: serde::de::DeserializeOwned>(&self, format: WireFormat) -> Result<M, WireError> {
        format.decode(self.payload())
    }
}

/// Concurrent frame re-assembler with timeout-based eviction.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: NonZeroUsize,
    timeout: Duration,
    slots: DashMap<SlotKey, Slot>,
}

impl Reassembler {
    /// Create a re-assembler that caps reconstructed payloads at
    /// `max_message_size` bytes and forgets state older than `timeout`.
    #[must_use]
    pub fn new(max_message_size: NonZeroUsize, timeout: Duration) -> Self {
        Self {
            max_message_size,
            timeout,
            slots: DashMap::new(),
        }
    }

    /// Process a frame using the current time.
    ///
    /// Returns `Ok(Some(_))` when the frame completes its message and
    /// `Ok(None)` while more frames are required or when the frame is a late
    /// duplicate of an already completed message.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when the frame contradicts what is already
    /// known about its message or pushes it past the size cap. The partial
    /// state is discarded in that case.
    pub fn accept(&self, frame: Frame) -> Result<Option<ReassembledMessage>, ReassemblyError> {
        self.accept_at(frame, Instant::now())
    }

    /// Process a frame using an explicit clock reading.
    ///
    /// Accepting an explicit `now` simplifies deterministic testing and allows
    /// callers to co-ordinate eviction sweeps with their own timers.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::accept`].
    pub fn accept_at(
        &self,
        frame: Frame,
        now: Instant,
    ) -> Result<Option<ReassembledMessage>, ReassemblyError> {
        let key = (frame.kind(), frame.message_id().clone());

        // The shard lock is held only while the entry guard lives.
        let state = match self.slots.entry(key.clone()) {
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Assembling(state) => Arc::clone(state),
                Slot::Completed { .. } => return Ok(None),
            },
            Entry::Vacant(vacant) => {
                let state = Arc::new(Mutex::new(ReassemblyState::new(now)));
                vacant.insert(Slot::Assembling(Arc::clone(&state)));
                state
            }
        };

        let progress = state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(frame, self.max_message_size);

        match progress {
            Ok(Progress::Incomplete | Progress::Finished) => Ok(None),
            Ok(Progress::Complete(payload)) => {
                self.slots.insert(key.clone(), Slot::Completed { at: now });
                let (kind, message_id) = key;
                Ok(Some(ReassembledMessage::new(message_id, kind, payload)))
            }
            Err(err) => {
                self.slots.remove_if(&key, |_, slot| {
                    matches!(slot, Slot::Assembling(current) if Arc::ptr_eq(current, &state))
                });
                Err(err)
            }
        }
    }

    /// Remove any partial messages and tombstones that exceeded the
    /// configured timeout.
    ///
    /// Returns the keys of partial messages that were evicted.
    pub fn purge_expired(&self) -> Vec<(FrameKind, MessageId)> {
        self.purge_expired_at(Instant::now())
    }

    /// Remove any partial messages and tombstones that exceeded the
    /// configured timeout using an explicit clock reading.
    ///
    /// Returns the keys of partial messages that were evicted.
    pub fn purge_expired_at(&self, now: Instant) -> Vec<(FrameKind, MessageId)> {
        let mut evicted = Vec::new();
        let timeout = self.timeout;

        self.slots.retain(|key, slot| {
            let since = match slot {
                Slot::Assembling(state) => state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .started_at(),
                Slot::Completed { at } => *at,
            };
            let expired = now.saturating_duration_since(since) >= timeout;
            if expired && matches!(slot, Slot::Assembling(_)) {
                evicted.push(key.clone());
            }
            !expired
        });

        evicted
    }

    /// Number of partial messages currently buffered.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Assembling(_)))
            .count()
    }

    /// Configured eviction timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration { self.timeout }
}
