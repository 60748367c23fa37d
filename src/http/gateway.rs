//! Local HTTP listener feeding the tunnel.
//!
//! Every request is captured verbatim into a
//! [`ForwardedRequest`](crate::message::ForwardedRequest) with a fresh id,
//! sent through the [`Session`] and answered with the tunneled response or a
//! plain-text error describing why none arrived.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Request,
    Response,
    StatusCode,
    body::Body,
    header::{CONTENT_TYPE, HeaderName, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::sync::CancellationToken;

use super::{
    SKIPPED_RESPONSE_HEADERS,
    accept::{AcceptLoopOptions, accept_loop},
    collect_headers,
    is_skipped,
};
use crate::{
    correlation::CorrelationError,
    fragment::MessageId,
    message::{ForwardedRequest, ForwardedResponse},
    session::{CallError, Session},
};

/// Default time a gateway call waits for its response.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Translates local HTTP calls into tunneled calls.
#[derive(Clone, Debug)]
pub struct Gateway {
    session: Session,
    deadline: Duration,
}

impl Gateway {
    /// Forward through `session`, waiting up to `deadline` for each response.
    #[must_use]
    pub fn new(session: Session, deadline: Duration) -> Self { Self { session, deadline } }

    /// Per-call deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration { self.deadline }

    /// Serve HTTP/1 connections from `listener` until `options.shutdown`
    /// fires.
    pub async fn serve(self, listener: TcpListener, options: AcceptLoopOptions) {
        if let Ok(addr) = listener.local_addr() {
            info!("gateway listening: addr={addr}");
        }
        let gateway = Arc::new(self);
        let shutdown = options.shutdown.clone();
        accept_loop(
            Arc::new(listener),
            move |stream, peer_addr| {
                Arc::clone(&gateway).serve_connection(stream, peer_addr, shutdown.clone())
            },
            options,
        )
        .await;
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let service = service_fn(move |request| {
            let gateway = Arc::clone(&self);
            async move { Ok::<_, Infallible>(gateway.handle(request).await) }
        });
        let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);
        let result = select! {
            res = connection.as_mut() => res,
            () = shutdown.cancelled() => {
                connection.as_mut().graceful_shutdown();
                connection.as_mut().await
            }
        };
        if let Err(err) = result {
            debug!("http connection ended with error: peer_addr={peer_addr}, error={err}");
        }
    }

    /// Tunnel one HTTP request and build the reply.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!("cannot read request body: error={err}");
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Can't read body");
            }
        };

        let forwarded = ForwardedRequest {
            id: MessageId::generate(),
            method: parts.method.as_str().to_owned(),
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().unwrap_or_default().to_owned(),
            headers: collect_headers(&parts.headers),
            body: body.to_vec(),
        };
        debug!(
            "forwarding request: id={}, method={}, path={}",
            forwarded.id, forwarded.method, forwarded.path
        );

        match self.session.call(forwarded, self.deadline).await {
            Ok(response) => into_http_response(response),
            Err(err) => error_reply(&err),
        }
    }
}

/// Build the local reply for a tunneled response.
///
/// Hop-by-hop headers are dropped and an unusable status becomes a 502.
#[must_use]
pub fn into_http_response(response: ForwardedResponse) -> Response<Full<Bytes>> {
    let Ok(status) = StatusCode::from_u16(response.status_code) else {
        warn!(
            "invalid upstream status: id={}, status={}",
            response.id, response.status_code
        );
        return plain_text(StatusCode::BAD_GATEWAY, "Invalid upstream status");
    };

    let mut reply = Response::new(Full::new(Bytes::from(response.body)));
    *reply.status_mut() = status;
    let headers = reply.headers_mut();
    for (name, values) in &response.headers {
        if is_skipped(&SKIPPED_RESPONSE_HEADERS, name) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("dropping invalid upstream header name: name={name}");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    reply
}

/// Map a failed call onto the status and body returned to the HTTP client.
#[must_use]
pub fn error_reply(err: &CallError) -> Response<Full<Bytes>> {
    let (status, message) = match err {
        CallError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "Request timed out"),
        CallError::Transport(_) => (StatusCode::BAD_GATEWAY, "Failed to forward request"),
        CallError::Encode(_) | CallError::Split(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to marshal request")
        }
        CallError::Disconnected => (StatusCode::SERVICE_UNAVAILABLE, "Endpoint not connected"),
        CallError::Correlation(CorrelationError::TooManyPending { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Too many pending requests")
        }
        CallError::Correlation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to track request"),
    };
    plain_text(status, message)
}

fn plain_text(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut reply = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *reply.status_mut() = status;
    reply
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    reply
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use rstest::rstest;

    use super::*;
    use crate::{message::HeaderMultimap, transport::TransportError};

    async fn body_of(reply: Response<Full<Bytes>>) -> Bytes {
        reply
            .into_body()
            .collect()
            .await
            .expect("infallible body")
            .to_bytes()
    }

    #[rstest]
    #[case(
        CallError::Timeout { message_id: MessageId::new("t"), deadline: DEFAULT_DEADLINE },
        StatusCode::GATEWAY_TIMEOUT,
        "Request timed out"
    )]
    #[case(CallError::Transport(TransportError::Closed), StatusCode::BAD_GATEWAY, "Failed to forward request")]
    #[case(CallError::Disconnected, StatusCode::SERVICE_UNAVAILABLE, "Endpoint not connected")]
    #[case(
        CallError::Correlation(CorrelationError::TooManyPending { limit: NonZeroUsize::MIN }),
        StatusCode::SERVICE_UNAVAILABLE,
        "Too many pending requests"
    )]
    #[tokio::test]
    async fn call_errors_map_to_statuses(
        #[case] err: CallError,
        #[case] status: StatusCode,
        #[case] message: &str,
    ) {
        let reply = error_reply(&err);
        assert_eq!(reply.status(), status);
        assert_eq!(reply.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(reply).await, message.as_bytes());
    }

    #[tokio::test]
    async fn tunneled_response_is_copied_without_hop_by_hop_headers() {
        let mut headers = HeaderMultimap::new();
        headers.insert("Set-Cookie".into(), vec!["a=1".into(), "b=2".into()]);
        headers.insert("Connection".into(), vec!["close".into()]);
        headers.insert("Content-Length".into(), vec!["999".into()]);
        let reply = into_http_response(ForwardedResponse {
            id: MessageId::new("r"),
            status_code: 201,
            headers,
            body: b"created".to_vec(),
        });

        assert_eq!(reply.status(), StatusCode::CREATED);
        let cookies: Vec<_> = reply.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        assert!(reply.headers().get("connection").is_none());
        assert!(reply.headers().get("content-length").is_none());
        assert_eq!(body_of(reply).await, "created");
    }

    #[tokio::test]
    async fn invalid_status_is_a_bad_gateway() {
        let reply = into_http_response(ForwardedResponse {
            id: MessageId::new("r"),
            status_code: 42,
            headers: HeaderMultimap::new(),
            body: Vec::new(),
        });
        assert_eq!(reply.status(), StatusCode::BAD_GATEWAY);
    }
}
