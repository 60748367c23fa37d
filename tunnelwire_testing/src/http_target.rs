//! Local HTTP target for forwarding tests.
//!
//! Routes:
//! - `/status/<code>` answers with that status and an empty body.
//! - `/bytes/<n>` answers 200 with `n` bytes cycling through `0..=250`.
//! - anything else answers 200 with the request body, plus `x-echo-method`
//!   and `x-echo-uri` headers and every `x-*` request header copied back.

use std::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use rstest::fixture;
use tokio::{net::TcpListener, task::JoinHandle};

/// A running echo server; aborted on drop.
#[derive(Debug)]
pub struct EchoServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind echo server");
        let addr = listener.local_addr().expect("echo server address");
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(respond))
                        .await;
                });
            }
        });
        Self { addr, task }
    }

    /// Address the server listens on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Base URL suitable for `--host`.
    #[must_use]
    pub fn base_url(&self) -> String { format!("http://{}", self.addr) }
}

impl Drop for EchoServer {
    fn drop(&mut self) { self.task.abort(); }
}

/// rstest fixture starting an [`EchoServer`].
#[fixture]
pub async fn echo_server() -> EchoServer { EchoServer::start().await }

async fn respond(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = request.uri().path().to_owned();
    if let Some(code) = path.strip_prefix("/status/") {
        let status = code
            .parse()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        return Ok(response);
    }
    if let Some(len) = path.strip_prefix("/bytes/") {
        let len: usize = len.parse().unwrap_or(0);
        let body: Vec<u8> = (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect();
        return Ok(Response::new(Full::new(Bytes::from(body))));
    }

    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let echoed: Vec<_> = request
        .headers()
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let body = request
        .into_body()
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default();

    let mut builder = Response::builder()
        .header("x-echo-method", method)
        .header("x-echo-uri", uri);
    for (name, value) in echoed {
        builder = builder.header(name, value);
    }
    Ok(builder
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}
