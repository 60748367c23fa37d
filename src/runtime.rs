//! Process-level entry points for both roles.
//!
//! The gateway dials its endpoint, then serves HTTP until shutdown. The
//! endpoint listens for gateway links and runs one session per accepted
//! link, each with its own [`SessionState`].

use std::{future::Future, net::SocketAddr, sync::Arc};

use log::{info, warn};
use tokio::{net::TcpListener, select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::{Role, TunnelConfig},
    error::Result,
    http::{AcceptLoopOptions, BackoffConfig, Downstream, Gateway, HttpDownstream, accept_loop},
    session::{Session, SessionState},
    transport::tcp,
};

/// Run the configured role until Ctrl+C.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound, the gateway cannot reach
/// its endpoint or the downstream client cannot be built.
pub async fn run(config: TunnelConfig) -> Result<()> {
    run_with_shutdown(config, async {
        let _ = signal::ctrl_c().await;
    })
    .await
}

/// Run the configured role until `shutdown` resolves.
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_shutdown<S>(config: TunnelConfig, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send,
{
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    match config.role.clone() {
        Role::Gateway { target, port } => {
            let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
            start_gateway(&config, &target, listener, &token, &tracker).await?;
        }
        Role::Endpoint { id, host } => {
            let listener = TcpListener::bind(config.peer_addr).await?;
            let downstream: Arc<dyn Downstream> = Arc::new(HttpDownstream::new(host.as_str())?);
            info!("endpoint ready: id={id}, host={host}");
            start_endpoint(&config, &id, downstream, listener, &token, &tracker);
        }
    }

    select! {
        () = shutdown => token.cancel(),
        () = tracker.wait() => {},
    }
    tracker.close();
    tracker.wait().await;
    Ok(())
}

/// Dial the endpoint named `target`, then serve HTTP on `listener`.
///
/// The session and the HTTP accept loop run on `tracker` until `shutdown`
/// is cancelled.
///
/// # Errors
///
/// Returns an error if the link cannot be established.
pub async fn start_gateway(
    config: &TunnelConfig,
    target: &str,
    listener: TcpListener,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<Session> {
    info!(
        "connecting to endpoint: target={target}, addr={}",
        config.peer_addr
    );
    let link = tcp::connect(
        config.peer_addr,
        target,
        config.max_frame,
        config.handshake_timeout,
    )
    .await?;
    let (outbound, inbound) = link.into_parts();
    let state = Arc::new(SessionState::new(&config.fragmentation, config.max_pending));
    let session = Session::new(outbound, state, None, config.session_config());

    let runner = session.clone();
    let token = shutdown.clone();
    tracker.spawn(async move {
        runner.run(inbound, token).await;
        warn!("endpoint link closed; calls now fail with 503");
    });
    tracker.spawn(Gateway::new(session.clone(), config.deadline).serve(
        listener,
        AcceptLoopOptions {
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));
    Ok(session)
}

/// Accept gateway links on `listener` and serve each with `downstream`.
pub fn start_endpoint(
    config: &TunnelConfig,
    id: &str,
    downstream: Arc<dyn Downstream>,
    listener: TcpListener,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("waiting for gateway links: id={id}, addr={addr}");
    }
    let config = Arc::new(config.clone());
    let id: Arc<str> = Arc::from(id);
    let token = shutdown.clone();
    tracker.spawn(accept_loop(
        Arc::new(listener),
        move |stream, peer_addr| {
            let config = Arc::clone(&config);
            let id = Arc::clone(&id);
            let downstream = Arc::clone(&downstream);
            let shutdown = token.clone();
            async move {
                let link = match tcp::accept(
                    stream,
                    &id,
                    config.max_frame,
                    config.handshake_timeout,
                )
                .await
                {
                    Ok(link) => link,
                    Err(err) => {
                        warn!("refused gateway link: peer_addr={peer_addr}, error={err}");
                        return;
                    }
                };
                info!("gateway connected: peer_addr={peer_addr}");
                let (outbound, inbound) = link.into_parts();
                let state = Arc::new(SessionState::new(&config.fragmentation, config.max_pending));
                Session::new(outbound, state, Some(downstream), config.session_config())
                    .run(inbound, shutdown)
                    .await;
                info!("gateway disconnected: peer_addr={peer_addr}");
            }
        },
        AcceptLoopOptions {
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));
}
