//! Accept loop shared by the gateway HTTP listener and the endpoint's link
//! listener.

use std::{any::Any, future::Future, io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;

/// Source of incoming connections consumed by [`accept_loop`].
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Shutdown and retry settings for [`accept_loop`].
#[derive(Clone, Debug, Default)]
pub struct AcceptLoopOptions {
    /// Stops the loop when cancelled.
    pub shutdown: CancellationToken,
    /// Tracks connection tasks so callers can wait for them to drain.
    pub tracker: TaskTracker,
    /// Retry timing after failed accepts.
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` until `shutdown` fires, running
/// `handler` for each on a task tracked by `tracker`.
///
/// Failed accepts are retried after an exponential back-off. A panicking
/// handler is logged and does not stop the loop.
pub async fn accept_loop<L, H, Fut>(listener: Arc<L>, handler: H, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let AcceptLoopOptions {
        shutdown,
        tracker,
        backoff,
    } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;

    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    spawn_connection_task(handler(stream, peer_addr), peer_addr, &tracker);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    sleep(delay).await;
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
}

fn spawn_connection_task<Fut>(task: Fut, peer_addr: SocketAddr, tracker: &TaskTracker)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tracker.spawn(async move {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            let panic_msg = panic_message(panic.as_ref());
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr}");
            tracing::error!(panic = %panic_msg, %peer_addr, "connection task panicked");
        }
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else {
        "non-string panic payload"
    }
}
