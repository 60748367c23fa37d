//! Per-message accumulation of frame payloads.

use std::{collections::BTreeMap, num::NonZeroUsize};

use tokio::time::Instant;

use super::{Frame, ReassemblyError, Sequence};

/// Result of recording one frame into a [`ReassemblyState`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    /// More frames are required.
    Incomplete,
    /// The frame completed the message; the payload is ready.
    Complete(Vec<u8>),
    /// The state already produced its payload; the frame was ignored.
    Finished,
}

/// Frames collected so far for one `(kind, message_id)`.
///
/// Payloads are keyed by sequence number so arrival order does not matter.
/// Re-sending a sequence number overwrites the earlier payload.
#[derive(Debug)]
pub(crate) struct ReassemblyState {
    parts: BTreeMap<Sequence, Vec<u8>>,
    terminal: Option<Sequence>,
    buffered_bytes: usize,
    started_at: Instant,
    finished: bool,
}

impl ReassemblyState {
    pub(crate) fn new(started_at: Instant) -> Self {
        Self {
            parts: BTreeMap::new(),
            terminal: None,
            buffered_bytes: 0,
            started_at,
            finished: false,
        }
    }

    pub(crate) fn started_at(&self) -> Instant { self.started_at }

    pub(crate) fn record(
        &mut self,
        frame: Frame,
        limit: NonZeroUsize,
    ) -> Result<Progress, ReassemblyError> {
        if self.finished {
            return Ok(Progress::Finished);
        }

        let sequence = frame.sequence();
        let kind = frame.kind();

        if frame.is_last() {
            if let Some(first) = self.terminal.filter(|first| *first != sequence) {
                return Err(ReassemblyError::ConflictingTerminal {
                    message_id: frame.message_id().clone(),
                    kind,
                    first,
                    second: sequence,
                });
            }
            if let Some(found) = self.highest().filter(|highest| *highest > sequence) {
                return Err(ReassemblyError::BeyondTerminal {
                    message_id: frame.message_id().clone(),
                    kind,
                    terminal: sequence,
                    found,
                });
            }
            self.terminal = Some(sequence);
        } else if let Some(terminal) = self.terminal.filter(|terminal| sequence >= *terminal) {
            return Err(ReassemblyError::BeyondTerminal {
                message_id: frame.message_id().clone(),
                kind,
                terminal,
                found: sequence,
            });
        }

        let replaced = self.parts.get(&sequence).map_or(0, Vec::len);
        let attempted = self
            .buffered_bytes
            .saturating_sub(replaced)
            .saturating_add(frame.payload().len());
        if attempted > limit.get() {
            return Err(ReassemblyError::MessageTooLarge {
                message_id: frame.message_id().clone(),
                kind,
                attempted,
                limit,
            });
        }
        self.buffered_bytes = attempted;
        self.parts.insert(sequence, frame.into_payload());

        if self.is_complete() {
            Ok(Progress::Complete(self.drain()))
        } else {
            Ok(Progress::Incomplete)
        }
    }

    fn is_complete(&self) -> bool {
        let Some(terminal) = self.terminal else {
            return false;
        };
        self.parts.len() == terminal.frame_count() && self.highest() == Some(terminal)
    }

    fn highest(&self) -> Option<Sequence> { self.parts.keys().next_back().copied() }

    fn drain(&mut self) -> Vec<u8> {
        self.finished = true;
        let parts = std::mem::take(&mut self.parts);
        let mut buffer = Vec::with_capacity(self.buffered_bytes);
        for payload in parts.into_values() {
            buffer.extend_from_slice(&payload);
        }
        self.buffered_bytes = 0;
        buffer
    }
}
