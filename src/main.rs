//! Authgate - OIDC authenticating reverse proxy

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use authgate::{cli::Cli, config::Config, proxy::Proxy, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream = upstream;
    }

    let proxy = match Proxy::new(config).await {
        Ok(proxy) => proxy,
        Err(e) => {
            error!(error = %e, "Failed to start the proxy");
            return ExitCode::FAILURE;
        }
    };

    match proxy.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Proxy terminated with an error");
            ExitCode::FAILURE
        }
    }
}
