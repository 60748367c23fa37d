//! Crate-level error type.
//!
//! Each module reports its own error enum; [`TunnelError`] gathers the ones
//! that can stop a running process so the binary has a single surface to
//! report.

use std::io;

use thiserror::Error;

use crate::{
    config::ConfigError,
    correlation::CorrelationError,
    fragment::{ReassemblyError, SplitError},
    session::CallError,
    transport::{HandshakeError, TransportError},
    wire::WireError,
};

/// Top-level error type exposed by `tunnelwire`.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The downstream HTTP client could not be built.
    #[error("cannot build downstream client: {0}")]
    Downstream(#[from] reqwest::Error),
    /// The metrics exporter could not be installed.
    #[error("cannot start metrics exporter: {0}")]
    Metrics(String),
    /// A listener could not be bound or failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used by the runtime entry points.
pub type Result<T> = std::result::Result<T, TunnelError>;
