//! Two sessions joined by the in-memory transport.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tunnelwire::{
    Session,
    SessionConfig,
    SessionState,
    http::Downstream,
    transport::memory,
};

/// Blob ceiling used by [`SessionPair::memory`].
pub const MEMORY_MAX_FRAME: usize = 64 * 1024;

/// A gateway session without a handler and an endpoint session executing
/// requests through a [`Downstream`], both running until [`shutdown`].
///
/// [`shutdown`]: SessionPair::shutdown
pub struct SessionPair {
    pub gateway: Session,
    pub endpoint: Session,
    pub token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SessionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPair")
            .field("gateway", &self.gateway)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl SessionPair {
    /// Join two sessions with default settings.
    #[must_use]
    pub fn memory(handler: Arc<dyn Downstream>) -> Self {
        Self::with_config(handler, SessionConfig::default(), MEMORY_MAX_FRAME)
    }

    /// Join two sessions sharing `config`, over a pair refusing blobs larger
    /// than `max_frame`.
    #[must_use]
    pub fn with_config(handler: Arc<dyn Downstream>, config: SessionConfig, max_frame: usize) -> Self {
        let (a, b) = memory::pair(max_frame);
        let (a_out, a_in) = a.into_parts();
        let (b_out, b_in) = b.into_parts();
        let gateway = Session::new(a_out, Arc::new(SessionState::default()), None, config);
        let endpoint = Session::new(
            b_out,
            Arc::new(SessionState::default()),
            Some(handler),
            config,
        );
        let token = CancellationToken::new();
        let tasks = [(gateway.clone(), a_in), (endpoint.clone(), b_in)]
            .into_iter()
            .map(|(session, inbound)| {
                let token = token.clone();
                tokio::spawn(async move { session.run(inbound, token).await })
            })
            .collect();
        Self {
            gateway,
            endpoint,
            token,
            tasks,
        }
    }

    /// Stop both sessions and wait for them to finish.
    ///
    /// # Panics
    ///
    /// Panics if a session task panicked.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            task.await.expect("session task panicked");
        }
    }
}
