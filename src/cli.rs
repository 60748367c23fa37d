//! Command line interface for the `tunnelwire` binary.
//!
//! Kept free of crate-internal types so `build.rs` can include it to render
//! the manual page.

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};

/// Which side of the tunnel this process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Accept local HTTP calls and tunnel them to an endpoint.
    Gateway,
    /// Accept a gateway link and replay its calls against `--host`.
    Endpoint,
}

/// Encoding used for frames on the peer link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum WireFormatArg {
    /// JSON records with base64 byte fields.
    #[default]
    Json,
    /// Compact bincode records.
    Bincode,
}

/// Command line arguments for the `tunnelwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "tunnelwire",
    version,
    about = "Tunnel HTTP calls across a framed peer link"
)]
pub struct Cli {
    /// Run in 'gateway' or 'endpoint' mode.
    #[arg(long, value_enum, env = "TUNNELWIRE_MODE")]
    pub mode: Option<Mode>,

    /// Identity of this endpoint. Example: --id=your_endpoint_id
    #[arg(long, env = "TUNNELWIRE_ID")]
    pub id: Option<String>,

    /// Endpoint identity the gateway connects to. Example: --target=your_endpoint_id
    #[arg(long, env = "TUNNELWIRE_TARGET")]
    pub target: Option<String>,

    /// Link address: dialled by the gateway, listened on by the endpoint.
    #[arg(long, env = "TUNNELWIRE_PEER_ADDR", default_value = "127.0.0.1:7700")]
    pub peer_addr: SocketAddr,

    /// Target server for endpoint mode. Example: --host=http://localhost:8000
    #[arg(long, env = "TUNNELWIRE_HOST")]
    pub host: Option<String>,

    /// Gateway HTTP port. Example: --port=8000
    #[arg(long, env = "TUNNELWIRE_PORT")]
    pub port: Option<u16>,

    /// Largest payload slice carried by one frame, in bytes.
    #[arg(long, env = "TUNNELWIRE_CHUNK_SIZE", default_value_t = 16 * 1024)]
    pub chunk_size: usize,

    /// Largest blob the link accepts, in bytes.
    #[arg(long, env = "TUNNELWIRE_MAX_FRAME", default_value_t = 64 * 1024)]
    pub max_frame: usize,

    /// Seconds a gateway call waits for its response.
    #[arg(long, env = "TUNNELWIRE_DEADLINE_SECS", default_value_t = 30)]
    pub deadline_secs: u64,

    /// Seconds an incomplete message is kept before it is discarded.
    #[arg(long, env = "TUNNELWIRE_REASSEMBLY_TIMEOUT_SECS", default_value_t = 60)]
    pub reassembly_timeout_secs: u64,

    /// Encoding used on the link; both peers must agree.
    #[arg(long, value_enum, env = "TUNNELWIRE_WIRE_FORMAT", default_value_t = WireFormatArg::Json)]
    pub wire_format: WireFormatArg,

    /// Most gateway calls waiting at once; 0 disables the cap.
    #[arg(long, env = "TUNNELWIRE_MAX_PENDING", default_value_t = 1024)]
    pub max_pending: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "TUNNELWIRE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
