//! Tests for inbound reassembly ordering, idempotence, limits and expiry.

use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use rstest::{fixture, rstest};
use tokio::time::Instant;

use crate::fragment::{
    Frame,
    FrameKind,
    MessageId,
    Reassembler,
    ReassemblyError,
    Sequence,
    Splitter,
};

#[fixture]
fn reassembler() -> Reassembler {
    Reassembler::new(
        NonZeroUsize::new(1024 * 1024).expect("non-zero"),
        Duration::from_secs(30),
    )
}

fn frame(id: &str, sequence: u32, is_last: bool, payload: &[u8]) -> Frame {
    Frame::new(
        MessageId::new(id),
        FrameKind::Response,
        Sequence::new(sequence),
        is_last,
        payload.to_vec(),
    )
}

fn split(id: &str, cap: usize, payload: &[u8]) -> Vec<Frame> {
    Splitter::new(NonZeroUsize::new(cap).expect("non-zero"))
        .split(&MessageId::new(id), FrameKind::Response, payload)
        .expect("split")
        .into_frames()
}

#[rstest]
fn single_terminal_frame_completes_immediately(reassembler: Reassembler) {
    let complete = reassembler
        .accept(frame("one", 0, true, &[1, 2, 3, 4]))
        .expect("accept")
        .expect("single frame completes the message");

    assert_eq!(complete.message_id(), &MessageId::new("one"));
    assert_eq!(complete.kind(), FrameKind::Response);
    assert_eq!(complete.payload(), &[1, 2, 3, 4]);
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn empty_payload_is_a_complete_message(reassembler: Reassembler) {
    let complete = reassembler
        .accept(frame("empty", 0, true, &[]))
        .expect("accept")
        .expect("complete");
    assert!(complete.payload().is_empty());
}

#[rstest]
fn ordered_frames_accumulate(reassembler: Reassembler) {
    assert!(
        reassembler
            .accept(frame("m", 0, false, &[5, 6, 7]))
            .expect("first")
            .is_none()
    );
    assert_eq!(reassembler.buffered_len(), 1);

    let complete = reassembler
        .accept(frame("m", 1, true, &[8, 9]))
        .expect("final")
        .expect("message should complete");

    assert_eq!(complete.payload(), &[5, 6, 7, 8, 9]);
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
#[case(&[0, 1, 2])]
#[case(&[0, 2, 1])]
#[case(&[1, 0, 2])]
#[case(&[1, 2, 0])]
#[case(&[2, 0, 1])]
#[case(&[2, 1, 0])]
fn any_permutation_of_forty_kib_reassembles(reassembler: Reassembler, #[case] order: &[usize]) {
    let payload: Vec<u8> = (0..40 * 1024).map(|i| (i % 251) as u8).collect();
    let frames = split("perm", 16 * 1024, &payload);
    assert_eq!(frames.len(), 3);

    let mut outputs = Vec::new();
    for &index in order {
        if let Some(message) = reassembler
            .accept(frames[index].clone())
            .expect("accept")
        {
            outputs.push(message.into_payload());
        }
    }

    assert_eq!(outputs, vec![payload]);
}

#[rstest]
fn duplicate_before_completion_overwrites(reassembler: Reassembler) {
    assert!(
        reassembler
            .accept(frame("dup", 0, false, &[1]))
            .expect("first")
            .is_none()
    );
    assert!(
        reassembler
            .accept(frame("dup", 0, false, &[1]))
            .expect("duplicate")
            .is_none()
    );
    let complete = reassembler
        .accept(frame("dup", 1, true, &[2]))
        .expect("final")
        .expect("complete");
    assert_eq!(complete.payload(), &[1, 2]);
}

#[rstest]
fn late_duplicates_do_not_resurrect_state(reassembler: Reassembler) {
    let frames = split("late", 2, &[1, 2, 3]);
    let mut completions = 0;
    for frame in frames.iter().cloned() {
        if reassembler.accept(frame).expect("accept").is_some() {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);

    for frame in frames {
        assert!(reassembler.accept(frame).expect("replay").is_none());
    }
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn kinds_are_partitioned(reassembler: Reassembler) {
    let request = Frame::new(
        MessageId::new("shared"),
        FrameKind::Request,
        Sequence::zero(),
        false,
        vec![1],
    );
    assert!(reassembler.accept(request).expect("request").is_none());

    let response = reassembler
        .accept(frame("shared", 0, true, &[9]))
        .expect("response")
        .expect("response completes independently");
    assert_eq!(response.payload(), &[9]);
    assert_eq!(reassembler.buffered_len(), 1);
}

#[rstest]
fn frame_beyond_terminal_discards_partial(reassembler: Reassembler) {
    assert!(
        reassembler
            .accept(frame("beyond", 1, true, &[1]))
            .expect("terminal")
            .is_none()
    );
    let err = reassembler
        .accept(frame("beyond", 5, false, &[2]))
        .expect_err("frame past terminal must fail");
    assert!(matches!(
        err,
        ReassemblyError::BeyondTerminal { terminal, found, .. }
            if terminal == Sequence::new(1) && found == Sequence::new(5)
    ));
    assert_eq!(reassembler.buffered_len(), 0);
}

#[rstest]
fn stray_high_sequence_cannot_fake_completion(reassembler: Reassembler) {
    assert!(
        reassembler
            .accept(frame("gap", 0, false, &[0]))
            .expect("first")
            .is_none()
    );
    assert!(
        reassembler
            .accept(frame("gap", 5, false, &[5]))
            .expect("stray")
            .is_none()
    );
    let err = reassembler
        .accept(frame("gap", 1, true, &[1]))
        .expect_err("terminal below a stored sequence must fail");
    assert!(matches!(err, ReassemblyError::BeyondTerminal { .. }));
}

#[rstest]
fn conflicting_terminals_are_rejected(reassembler: Reassembler) {
    assert!(
        reassembler
            .accept(frame("conflict", 2, true, &[1]))
            .expect("terminal")
            .is_none()
    );
    let err = reassembler
        .accept(frame("conflict", 1, true, &[2]))
        .expect_err("second terminal must fail");
    assert!(matches!(err, ReassemblyError::ConflictingTerminal { .. }));
    assert_eq!(reassembler.buffered_len(), 0);
}

#[test]
fn oversized_message_is_rejected() {
    let reassembler = Reassembler::new(
        NonZeroUsize::new(4).expect("non-zero"),
        Duration::from_secs(30),
    );
    assert!(
        reassembler
            .accept(frame("big", 0, false, &[1, 2, 3]))
            .expect("within limit")
            .is_none()
    );
    let err = reassembler
        .accept(frame("big", 1, true, &[4, 5]))
        .expect_err("over limit");
    assert!(matches!(
        err,
        ReassemblyError::MessageTooLarge { attempted: 5, .. }
    ));
    assert_eq!(reassembler.buffered_len(), 0);
}

#[test]
fn message_at_exact_limit_is_accepted() {
    let reassembler = Reassembler::new(
        NonZeroUsize::new(16).expect("non-zero"),
        Duration::from_secs(5),
    );
    let frames = split("exact", 8, &[0; 16]);
    let mut result = None;
    for frame in frames {
        result = reassembler.accept(frame).expect("within limit");
    }
    assert_eq!(result.expect("complete").payload().len(), 16);
}

#[test]
fn expired_partials_are_purged() {
    let reassembler = Reassembler::new(
        NonZeroUsize::new(64).expect("non-zero"),
        Duration::from_secs(1),
    );
    let start = Instant::now();
    assert!(
        reassembler
            .accept_at(frame("stale", 0, false, &[1]), start)
            .expect("accept")
            .is_none()
    );

    assert!(
        reassembler
            .purge_expired_at(start + Duration::from_millis(500))
            .is_empty()
    );
    let evicted = reassembler.purge_expired_at(start + Duration::from_secs(1));
    assert_eq!(evicted, vec![(FrameKind::Response, MessageId::new("stale"))]);
    assert_eq!(reassembler.buffered_len(), 0);
}

#[test]
fn tombstones_expire_silently() {
    let reassembler = Reassembler::new(
        NonZeroUsize::new(64).expect("non-zero"),
        Duration::from_secs(1),
    );
    let start = Instant::now();
    let replay = frame("done", 0, true, &[1]);
    assert!(
        reassembler
            .accept_at(replay.clone(), start)
            .expect("accept")
            .is_some()
    );
    assert!(
        reassembler
            .accept_at(replay.clone(), start)
            .expect("replay")
            .is_none()
    );

    assert!(
        reassembler
            .purge_expired_at(start + Duration::from_secs(2))
            .is_empty()
    );
    // Once the tombstone is gone the id is treated as new again.
    assert!(
        reassembler
            .accept_at(replay, start + Duration::from_secs(2))
            .expect("accept")
            .is_some()
    );
}

#[test]
fn concurrent_frames_complete_exactly_once() {
    let reassembler = Arc::new(Reassembler::new(
        NonZeroUsize::new(1024 * 1024).expect("non-zero"),
        Duration::from_secs(30),
    ));
    let payload: Vec<u8> = (0..=255).cycle().take(10_000).collect();
    let frames = split("concurrent", 97, &payload);

    let completions: Vec<Vec<u8>> = std::thread::scope(|scope| {
        let handles: Vec<_> = frames
            .chunks(7)
            .map(|chunk| {
                let reassembler = Arc::clone(&reassembler);
                // Every frame is sent twice to exercise duplicate handling.
                let chunk: Vec<Frame> = chunk.iter().chain(chunk.iter()).cloned().collect();
                scope.spawn(move || {
                    chunk
                        .into_iter()
                        .filter_map(|frame| reassembler.accept(frame).expect("accept"))
                        .map(|message| message.into_payload())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("thread"))
            .collect()
    });

    assert_eq!(completions, vec![payload]);
    assert_eq!(reassembler.buffered_len(), 0);
}
