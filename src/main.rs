//! `tunnelwire` binary: run a gateway or an endpoint.

use std::process::ExitCode;

use clap::Parser;
use tunnelwire::{TunnelConfig, TunnelError, cli::Cli, runtime};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match TunnelConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = install_metrics(&config) {
        log::error!("{err}");
        return ExitCode::FAILURE;
    }

    log::info!(
        "starting: role={:?}, wire_format={}",
        config.role,
        config.wire_format.as_str()
    );
    match runtime::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "metrics")]
fn install_metrics(config: &TunnelConfig) -> Result<(), TunnelError> {
    let Some(addr) = config.metrics_addr else {
        return Ok(());
    };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| TunnelError::Metrics(err.to_string()))?;
    log::info!("metrics exporter listening: addr={addr}");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(config: &TunnelConfig) -> Result<(), TunnelError> {
    if config.metrics_addr.is_some() {
        log::warn!("--metrics-addr ignored: built without the metrics feature");
    }
    Ok(())
}
