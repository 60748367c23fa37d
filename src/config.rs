//! Runtime configuration assembled from the command line.
//!
//! [`TunnelConfig::from_cli`] checks that the flags required by the chosen
//! mode are present and that a full-size frame still fits the link's blob
//! ceiling once encoded.

use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use thiserror::Error;

use crate::{
    cli::{Cli, Mode, WireFormatArg},
    fragment::{FragmentationConfig, config::DEFAULT_MAX_MESSAGE_SIZE},
    session::SessionConfig,
    transport::handshake::DEFAULT_HANDSHAKE_TIMEOUT,
    wire::WireFormat,
};

/// Role-specific settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Serve HTTP on `port` and tunnel calls to the endpoint named `target`.
    Gateway { target: String, port: u16 },
    /// Accept links for identity `id` and replay calls against `host`.
    Endpoint { id: String, host: String },
}

/// Errors raised while validating the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("You must specify a mode. Example: --mode=gateway or --mode=endpoint")]
    MissingMode,
    #[error("You must specify a port. Example: --port=8000")]
    MissingPort,
    #[error("You must specify a client ID to connect to. Example: --target=your_endpoint_id")]
    MissingTarget,
    #[error("You must specify a host. Example: --host=http://localhost:8000")]
    MissingHost,
    #[error("You must specify a client ID to create. Example: --id=your_endpoint_id")]
    MissingId,
    #[error("invalid host {0:?}: expected an absolute http(s) URL")]
    InvalidHost(String),
    #[error("--{0} must be greater than zero")]
    Zero(&'static str),
    #[error(
        "--chunk-size {chunk_size} encodes to frames of up to {ceiling} bytes, which exceeds \
         --max-frame {max_frame}; the largest chunk that fits is {largest_chunk}"
    )]
    FrameTooLarge {
        chunk_size: usize,
        ceiling: usize,
        max_frame: usize,
        largest_chunk: usize,
    },
}

/// Validated settings for one process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelConfig {
    pub role: Role,
    /// Link address: dialled by the gateway, bound by the endpoint.
    pub peer_addr: SocketAddr,
    pub fragmentation: FragmentationConfig,
    /// Largest blob the link accepts.
    pub max_frame: usize,
    /// Time a gateway call waits for its response.
    pub deadline: Duration,
    pub wire_format: WireFormat,
    pub max_pending: Option<NonZeroUsize>,
    pub handshake_timeout: Duration,
    pub metrics_addr: Option<SocketAddr>,
}

impl TunnelConfig {
    /// Validate parsed command line arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first missing or inconsistent
    /// flag.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let role = match cli.mode.ok_or(ConfigError::MissingMode)? {
            Mode::Gateway => {
                let port = cli
                    .port
                    .filter(|port| *port != 0)
                    .ok_or(ConfigError::MissingPort)?;
                let target = non_empty(cli.target.as_deref()).ok_or(ConfigError::MissingTarget)?;
                Role::Gateway { target, port }
            }
            Mode::Endpoint => {
                let host = non_empty(cli.host.as_deref()).ok_or(ConfigError::MissingHost)?;
                if !(host.starts_with("http://") || host.starts_with("https://")) {
                    return Err(ConfigError::InvalidHost(host));
                }
                let id = non_empty(cli.id.as_deref()).ok_or(ConfigError::MissingId)?;
                Role::Endpoint { id, host }
            }
        };

        let wire_format = match cli.wire_format {
            WireFormatArg::Json => WireFormat::Json,
            WireFormatArg::Bincode => WireFormat::Bincode,
        };
        let frame_payload_cap =
            NonZeroUsize::new(cli.chunk_size).ok_or(ConfigError::Zero("chunk-size"))?;
        if cli.deadline_secs == 0 {
            return Err(ConfigError::Zero("deadline-secs"));
        }
        if cli.reassembly_timeout_secs == 0 {
            return Err(ConfigError::Zero("reassembly-timeout-secs"));
        }
        let fragmentation = FragmentationConfig {
            frame_payload_cap,
            max_message_size: NonZeroUsize::new(DEFAULT_MAX_MESSAGE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            reassembly_timeout: Duration::from_secs(cli.reassembly_timeout_secs),
        };
        if !fragmentation.fits_frame_budget(cli.max_frame, wire_format) {
            return Err(ConfigError::FrameTooLarge {
                chunk_size: cli.chunk_size,
                ceiling: fragmentation
                    .encoded_frame_ceiling(wire_format)
                    .unwrap_or(usize::MAX),
                max_frame: cli.max_frame,
                largest_chunk: FragmentationConfig::for_frame_budget(
                    cli.max_frame,
                    wire_format,
                    fragmentation.max_message_size,
                    fragmentation.reassembly_timeout,
                )
                .map_or(0, |fitting| fitting.frame_payload_cap.get()),
            });
        }

        Ok(Self {
            role,
            peer_addr: cli.peer_addr,
            fragmentation,
            max_frame: cli.max_frame,
            deadline: Duration::from_secs(cli.deadline_secs),
            wire_format,
            max_pending: NonZeroUsize::new(cli.max_pending),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            metrics_addr: cli.metrics_addr,
        })
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            wire_format: self.wire_format,
            frame_payload_cap: self.fragmentation.frame_payload_cap,
            ..SessionConfig::default()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
