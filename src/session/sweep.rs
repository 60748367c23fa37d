//! Periodic eviction of partial messages whose final frame never arrived.

use std::{sync::Arc, time::Duration};

use log::warn;
use tokio::{
    select,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use super::SessionState;
use crate::metrics;

/// Default spacing between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub(super) async fn sweep_expired(
    state: Arc<SessionState>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = state.reassembler.purge_expired();
                if !evicted.is_empty() {
                    metrics::add_evictions(evicted.len());
                    warn!("evicted stale partial messages: count={}", evicted.len());
                }
            }
        }
    }
}
