//! Proxy server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::idp::IdpClient;
use crate::session::store;
use crate::{Error, Result};

use super::router::{AppState, create_router};

/// The authenticating reverse proxy
pub struct Proxy {
    /// Configuration
    config: Config,
    /// Compiled runtime state shared with every request
    state: Arc<AppState>,
}

impl Proxy {
    /// Build the proxy: discover the identity provider, connect the refresh
    /// token store and compile the policy
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let idp = if config.discovery_url.is_empty() {
            None
        } else {
            let http = reqwest::Client::builder()
                .timeout(config.idp_timeout)
                .build()
                .map_err(|e| Error::Config(format!("idp client: {e}")))?;

            Some(Arc::new(
                IdpClient::discover(
                    http,
                    &config.discovery_url,
                    config.client_id.clone(),
                    config.client_secret.clone(),
                )
                .await?,
            ))
        };

        let store = match config.store_url {
            Some(ref url) => {
                let store = store::from_url(url).await?;
                info!(backend = store.backend_name(), "Using a refresh token store");
                Some(store)
            }
            None => None,
        };

        let state = AppState::new(config.clone(), idp, store)?;

        Ok(Self { config, state })
    }

    /// The assembled router; exposed for integration testing
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Run the proxy until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await?;

        info!("============================================================");
        info!("AUTHGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(listen = %self.config.listen, upstream = %self.config.upstream, "Listening");
        info!(resources = self.config.resources.len(), "Protected resources configured");
        if self.config.skip_token_verification {
            info!("Token verification is DISABLED, do not run this in production");
        }
        info!("============================================================");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Proxy shut down");
        Ok(())
    }
}

/// Resolve on ctrl-c or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
