//! Lookups over `metrics-util` debugging snapshots.
//!
//! Take one snapshot with `snapshotter.snapshot().into_vec()` and query it as
//! often as needed.

use metrics::{SharedString, Unit};
use metrics_util::{CompositeKey, debugging::DebugValue};

/// One entry of a debugging snapshot.
pub type SnapshotEntry = (CompositeKey, Option<Unit>, Option<SharedString>, DebugValue);

/// Sum of every counter named `name` whose labels include all of `labels`.
#[must_use]
pub fn counter_value(entries: &[SnapshotEntry], name: &str, labels: &[(&str, &str)]) -> u64 {
    entries
        .iter()
        .filter(|(key, ..)| {
            let key = key.key();
            key.name() == name
                && labels.iter().all(|(label, value)| {
                    key.labels()
                        .any(|l| l.key() == *label && l.value() == *value)
                })
        })
        .map(|(.., value)| match value {
            DebugValue::Counter(count) => *count,
            _ => 0,
        })
        .sum()
}

/// Value of the gauge named `name`, if it was recorded.
#[must_use]
pub fn gauge_value(entries: &[SnapshotEntry], name: &str) -> Option<f64> {
    entries.iter().find_map(|(key, _, _, value)| match value {
        DebugValue::Gauge(gauge) if key.key().name() == name => Some(gauge.into_inner()),
        _ => None,
    })
}
