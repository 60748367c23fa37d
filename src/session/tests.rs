//! Unit tests for the session loop over the in-memory transport.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rstest::rstest;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::*;
use crate::{
    http::Downstream,
    message::HeaderMultimap,
    transport::{FrameStream, Link, memory},
};

const MAX_FRAME: usize = 64 * 1024;

/// Answers every request with its own body and headers.
struct Echo;

#[async_trait]
impl Downstream for Echo {
    async fn execute(&self, request: ForwardedRequest) -> ForwardedResponse {
        ForwardedResponse {
            id: request.id,
            status_code: 200,
            headers: request.headers,
            body: request.body,
        }
    }
}

/// Never answers.
struct Stall;

#[async_trait]
impl Downstream for Stall {
    async fn execute(&self, _request: ForwardedRequest) -> ForwardedResponse {
        std::future::pending().await
    }
}

/// Refuses every frame.
struct BrokenTransport;

#[async_trait]
impl FrameTransport for BrokenTransport {
    async fn send(&self, _frame: Bytes) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }

    fn max_frame_size(&self) -> usize { MAX_FRAME }
}

fn config(cap: usize) -> SessionConfig {
    SessionConfig {
        frame_payload_cap: NonZeroUsize::new(cap).expect("non-zero cap"),
        ..SessionConfig::default()
    }
}

fn session(link_out: Arc<dyn FrameTransport>, handler: Option<Arc<dyn Downstream>>, cap: usize) -> Session {
    Session::new(link_out, Arc::new(SessionState::default()), handler, config(cap))
}

fn spawn_run(session: &Session, inbound: FrameStream, shutdown: &CancellationToken) -> JoinHandle<()> {
    let session = session.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move { session.run(inbound, shutdown).await })
}

/// A gateway session and an endpoint session joined by a memory pair.
struct Tunnel {
    gateway: Session,
    endpoint: Session,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

fn tunnel(handler: Arc<dyn Downstream>, cap: usize) -> Tunnel {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let (b_out, b_in) = b.into_parts();
    let gateway = session(a_out, None, cap);
    let endpoint = session(b_out, Some(handler), cap);
    let shutdown = CancellationToken::new();
    let tasks = vec![
        spawn_run(&gateway, a_in, &shutdown),
        spawn_run(&endpoint, b_in, &shutdown),
    ];
    Tunnel {
        gateway,
        endpoint,
        shutdown,
        tasks,
    }
}

impl Tunnel {
    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.expect("session task panicked");
        }
    }
}

fn request(body: Vec<u8>) -> ForwardedRequest {
    let mut headers = HeaderMultimap::new();
    headers.insert("X-Trace".into(), vec!["1".into()]);
    ForwardedRequest {
        id: MessageId::generate(),
        method: "POST".into(),
        path: "/echo".into(),
        query: String::new(),
        headers,
        body,
    }
}

#[rstest]
#[case(0)]
#[case(10)]
#[case(1024)]
#[case(200 * 1024 + 7)]
#[tokio::test]
async fn echo_round_trips_any_body_size(#[case] len: usize) {
    let tunnel = tunnel(Arc::new(Echo), 1024);
    let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let sent = request(body.clone());
    let id = sent.id.clone();

    let response = tunnel
        .gateway
        .call(sent, Duration::from_secs(5))
        .await
        .expect("call");

    assert_eq!(response.id, id);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, body);
    assert_eq!(response.headers.get("X-Trace"), Some(&vec!["1".to_owned()]));
    assert_eq!(tunnel.gateway.state().correlator.pending_len(), 0);
    assert_eq!(tunnel.endpoint.state().reassembler.buffered_len(), 0);
    tunnel.stop().await;
}

#[tokio::test]
async fn concurrent_calls_are_correlated_independently() {
    let tunnel = tunnel(Arc::new(Echo), 512);
    let calls = (0..16u8).map(|n| {
        let gateway = tunnel.gateway.clone();
        async move {
            let body = vec![n; 2000 + usize::from(n) * 97];
            let response = gateway
                .call(request(body.clone()), Duration::from_secs(5))
                .await
                .expect("call");
            assert_eq!(response.body, body);
        }
    });
    futures::future::join_all(calls).await;
    assert_eq!(tunnel.gateway.state().correlator.pending_len(), 0);
    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn unanswered_call_times_out_and_late_delivery_is_ignored() {
    let tunnel = tunnel(Arc::new(Stall), 1024);
    let sent = request(b"hello".to_vec());
    let id = sent.id.clone();

    let err = tunnel
        .gateway
        .call(sent, Duration::from_secs(30))
        .await
        .expect_err("nobody answers");

    assert!(matches!(
        err,
        CallError::Timeout { ref message_id, deadline }
            if *message_id == id && deadline == Duration::from_secs(30)
    ));
    let correlator = &tunnel.gateway.state().correlator;
    assert!(!correlator.is_pending(&id));
    assert!(!correlator.deliver(&id, ForwardedResponse::error(id.clone(), 200, "late")));
    assert!(logs_contain("call timed out"));
    tunnel.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_does_not_wait_for_a_stalled_downstream() {
    let tunnel = tunnel(Arc::new(Stall), 1024);
    let err = tunnel
        .gateway
        .call(request(b"slow".to_vec()), Duration::from_millis(200))
        .await
        .expect_err("nobody answers");
    assert!(matches!(err, CallError::Timeout { .. }));

    tokio::time::timeout(Duration::from_secs(5), tunnel.stop())
        .await
        .expect("shutdown must not wait on the downstream");
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_partials_whose_last_frame_never_arrives() {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let endpoint = session(a_out, Some(Arc::new(Echo)), 1024);
    let shutdown = CancellationToken::new();
    let run = spawn_run(&endpoint, a_in, &shutdown);

    let frame = Frame::new(
        MessageId::new("orphan"),
        FrameKind::Request,
        crate::fragment::Sequence::zero(),
        false,
        b"half".to_vec(),
    );
    b.outbound
        .send(Bytes::from(frame.encode(WireFormat::Json).expect("encode")))
        .await
        .expect("send");
    let reassembler = &endpoint.state().reassembler;
    while reassembler.buffered_len() == 0 {
        tokio::task::yield_now().await;
    }

    let ttl = reassembler.timeout();
    tokio::time::sleep(ttl / 2).await;
    assert_eq!(reassembler.buffered_len(), 1);

    tokio::time::sleep(ttl / 2 + DEFAULT_SWEEP_INTERVAL).await;
    assert_eq!(reassembler.buffered_len(), 0);

    shutdown.cancel();
    run.await.expect("run");
}

#[tokio::test]
async fn calls_fail_fast_once_the_link_is_gone() {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let gateway = session(a_out, None, 1024);
    let shutdown = CancellationToken::new();
    let run = spawn_run(&gateway, a_in, &shutdown);

    drop(b);
    run.await.expect("run");

    assert!(gateway.is_closed());
    let err = gateway
        .call(request(Vec::new()), Duration::from_secs(5))
        .await
        .expect_err("link is down");
    assert!(matches!(err, CallError::Disconnected));
}

#[tokio::test]
async fn waiting_call_is_woken_when_the_link_drops() {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let Link {
        outbound: peer_out,
        inbound: mut peer_in,
    } = b;
    let gateway = session(a_out, None, 1024);
    let shutdown = CancellationToken::new();
    let run = spawn_run(&gateway, a_in, &shutdown);

    let caller = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .call(request(b"x".to_vec()), Duration::from_secs(30))
                .await
        })
    };
    // Wait for the request to arrive, then hang up without answering.
    peer_in.next().await.expect("frame").expect("ok");
    drop(peer_out);
    drop(peer_in);

    let err = caller.await.expect("join").expect_err("no answer");
    assert!(matches!(err, CallError::Disconnected));
    run.await.expect("run");
    assert_eq!(gateway.state().correlator.pending_len(), 0);
}

#[tokio::test]
async fn garbage_frames_are_dropped_without_breaking_the_link() {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let Link {
        outbound: peer_out,
        inbound: mut peer_in,
    } = b;
    let gateway = session(a_out, None, 1024);
    let shutdown = CancellationToken::new();
    let run = spawn_run(&gateway, a_in, &shutdown);

    let caller = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .call(request(b"ping".to_vec()), Duration::from_secs(5))
                .await
        })
    };

    let blob = peer_in.next().await.expect("frame").expect("ok");
    let frame = Frame::decode(WireFormat::Json, &blob).expect("request frame");
    assert_eq!(frame.kind(), FrameKind::Request);
    assert!(frame.is_last());

    peer_out
        .send(Bytes::from_static(b"{not a frame"))
        .await
        .expect("send garbage");
    let reply = ForwardedResponse::error(frame.message_id().clone(), 418, "teapot")
        .encode(WireFormat::Json)
        .expect("encode");
    let batch = Splitter::new(NonZeroUsize::new(4).expect("cap"))
        .split(frame.message_id(), FrameKind::Response, &reply)
        .expect("split");
    for frame in batch {
        let encoded = frame.encode(WireFormat::Json).expect("encode frame");
        peer_out.send(Bytes::from(encoded)).await.expect("send");
    }

    let response = caller.await.expect("join").expect("call");
    assert_eq!(response.status_code, 418);
    assert_eq!(response.body, b"teapot");

    shutdown.cancel();
    run.await.expect("run");
}

#[tokio::test]
async fn request_frames_are_ignored_without_a_handler() {
    let (a, b) = memory::pair(MAX_FRAME);
    let (a_out, a_in) = a.into_parts();
    let gateway = session(a_out, None, 1024);
    let shutdown = CancellationToken::new();
    let run = spawn_run(&gateway, a_in, &shutdown);

    let frame = Frame::new(
        MessageId::new("stray"),
        FrameKind::Request,
        crate::fragment::Sequence::zero(),
        false,
        b"partial".to_vec(),
    );
    b.outbound
        .send(Bytes::from(frame.encode(WireFormat::Json).expect("encode")))
        .await
        .expect("send");
    // Closing the link lets `run` drain the frame before it returns.
    drop(b);

    run.await.expect("run");
    assert_eq!(gateway.state().reassembler.buffered_len(), 0);
}

#[tokio::test]
async fn send_failure_abandons_the_call() {
    let gateway = session(Arc::new(BrokenTransport), None, 1024);
    let err = gateway
        .call(request(b"x".to_vec()), Duration::from_secs(5))
        .await
        .expect_err("transport is broken");
    assert!(matches!(err, CallError::Transport(TransportError::Closed)));
    assert_eq!(gateway.state().correlator.pending_len(), 0);
}

#[tokio::test]
async fn empty_ids_are_replaced() {
    let tunnel = tunnel(Arc::new(Echo), 1024);
    let mut sent = request(b"anon".to_vec());
    sent.id = MessageId::default();
    let response = tunnel
        .gateway
        .call(sent, Duration::from_secs(5))
        .await
        .expect("call");
    assert!(!response.id.as_str().is_empty());
    assert_eq!(response.body, b"anon");
    tunnel.stop().await;
}
