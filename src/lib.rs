//! Authgate Library
//!
//! An authenticating reverse proxy enforcing OpenID Connect access control
//! in front of a protected upstream service.
//!
//! # Features
//!
//! - **Admission pipeline**: resource matching, JWT identity extraction,
//!   signature verification, role and claim checks
//! - **Transparent refresh**: expired session tokens are exchanged against
//!   the identity provider without interrupting the request
//! - **Pluggable refresh-token stores**: encrypted cookie, Redis, or disk
//! - **Encrypted sessions**: AES-256-GCM sealed cookies
//! - **Identity propagation**: `X-Auth-*` headers injected for the upstream

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod idp;
pub mod proxy;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
