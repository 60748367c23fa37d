//! Test support for `tunnelwire`.
//!
//! Provides a local HTTP target to forward to, canned [`Downstream`]
//! implementations and a helper that joins two sessions over the in-memory
//! transport.
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use tunnelwire::ForwardedRequest;
//! use tunnelwire_testing::{EchoDownstream, SessionPair};
//!
//! # async fn example() {
//! let pair = SessionPair::memory(Arc::new(EchoDownstream));
//! let response = pair
//!     .gateway
//!     .call(ForwardedRequest::default(), Duration::from_secs(1))
//!     .await
//!     .unwrap();
//! assert_eq!(response.status_code, 200);
//! pair.shutdown().await;
//! # }
//! ```
//!
//! [`Downstream`]: tunnelwire::http::Downstream

pub mod downstream;
pub mod http_target;
pub mod metrics;
pub mod session_pair;

pub use downstream::{EchoDownstream, RecordingDownstream, StallingDownstream};
pub use http_target::{EchoServer, echo_server};
pub use self::metrics::{SnapshotEntry, counter_value, gauge_value};
pub use session_pair::SessionPair;
