//! Command-line interface definitions for `authgate`.

use std::path::PathBuf;

use clap::Parser;

/// OIDC authenticating reverse proxy
///
/// Terminates untrusted HTTP traffic in front of an upstream service and
/// enforces per-URL, per-method, per-role access control against an OpenID
/// Connect identity provider. Browser clients are sent through the
/// Authorization Code flow; API clients present bearer tokens directly.
#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file (YAML)
    #[arg(short, long, env = "AUTHGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides config file)
    #[arg(short, long, env = "AUTHGATE_LISTEN")]
    pub listen: Option<String>,

    /// Upstream base URL to forward admitted requests to (overrides config file)
    #[arg(short, long, env = "AUTHGATE_UPSTREAM")]
    pub upstream: Option<String>,

    /// Minimum log level: trace, debug, info, warn, or error
    #[arg(long, default_value = "info", env = "AUTHGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format: "text" for human-readable, "json" for structured
    #[arg(long, env = "AUTHGATE_LOG_FORMAT")]
    pub log_format: Option<String>,
}
