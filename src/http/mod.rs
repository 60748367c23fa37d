//! HTTP edges of the tunnel.
//!
//! The gateway turns calls arriving on a local listener into
//! [`ForwardedRequest`](crate::message::ForwardedRequest)s and answers them
//! with whatever came back through the link. The endpoint side replays each
//! tunneled request against a fixed target through a [`Downstream`].

pub mod accept;
pub mod backoff;
pub mod downstream;
pub mod gateway;

pub use accept::{AcceptListener, AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
pub use downstream::{Downstream, HttpDownstream};
pub use gateway::Gateway;

/// Request headers that describe the inbound connection rather than the
/// request itself; the forwarding client recomputes them.
pub const SKIPPED_REQUEST_HEADERS: [&str; 4] =
    ["host", "content-length", "connection", "transfer-encoding"];

/// Response headers recomputed by the local HTTP server.
pub const SKIPPED_RESPONSE_HEADERS: [&str; 6] = [
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_skipped(list: &[&str], name: &str) -> bool {
    list.iter().any(|skipped| skipped.eq_ignore_ascii_case(name))
}

/// Collect an HTTP header map into the multimap carried by tunneled
/// messages. Non-UTF-8 values are converted lossily.
pub(crate) fn collect_headers(headers: &hyper::HeaderMap) -> crate::message::HeaderMultimap {
    let mut collected = crate::message::HeaderMultimap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_owned())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}
