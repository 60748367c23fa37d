#![doc(html_root_url = "https://docs.rs/tunnelwire/latest")]
//! Public API for the `tunnelwire` library.
//!
//! This crate tunnels HTTP request/response pairs across a link that only
//! carries small, ordered frames. Logical messages are split into frames,
//! reassembled on the far side and matched back to the call waiting for
//! them.

pub mod cli;
pub mod config;
pub mod correlation;
pub mod error;
pub mod fragment;
pub mod http;
pub mod message;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{ConfigError, Role, TunnelConfig};
pub use correlation::{CallHandle, CallState, CorrelationError, Correlator};
pub use error::TunnelError;
pub use fragment::{
    FragmentationConfig,
    Frame,
    FrameBatch,
    FrameKind,
    MessageId,
    ReassembledMessage,
    Reassembler,
    ReassemblyError,
    Sequence,
    SplitError,
    Splitter,
};
pub use message::{ForwardedRequest, ForwardedResponse, HeaderMultimap};
pub use self::metrics::{Direction, ERRORS_TOTAL, FRAMES_TOTAL};
pub use session::{CallError, Session, SessionConfig, SessionState};
pub use transport::{FrameStream, FrameTransport, Link, TransportError};
pub use wire::{WireError, WireFormat};
