//! HTTP router and shared application state.
//!
//! The admission pipeline is layered middleware: security filter, resource
//! matcher, authentication, admission, and finally the upstream forwarder as
//! the router fallback. The reserved OAuth sub-tree is nested beside the
//! fallback with its own CORS policy.

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::{Config, CorsConfig};
use crate::idp::IdpClient;
use crate::proxy::admission::admission_middleware;
use crate::proxy::auth::authentication_middleware;
use crate::proxy::forward::forward_handler;
use crate::proxy::headers::compile_claim_headers;
use crate::proxy::matcher::{PolicyTable, entry_point_middleware};
use crate::proxy::oauth::{
    authorize_handler, callback_handler, health_handler, login_handler, logout_handler,
};
use crate::proxy::security::security_middleware;
use crate::session::{CookieCodec, RefreshTokenStore};
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Frozen configuration
    pub config: Arc<Config>,
    /// Compiled policy table
    pub policy: Arc<PolicyTable>,
    /// Session cookie cipher
    pub codec: Arc<CookieCodec>,
    /// Identity provider client, absent only when verification is skipped
    pub idp: Option<Arc<IdpClient>>,
    /// Refresh token store; unset means cookie-backed refresh tokens
    pub store: Option<Arc<dyn RefreshTokenStore>>,
    /// Client used for upstream forwarding
    pub upstream_client: reqwest::Client,
    /// Precompiled `claim name → header name` pairs for `add_claims`
    pub claim_headers: Vec<(String, String)>,
}

impl AppState {
    /// Compile the runtime state from a validated configuration
    pub fn new(
        config: Config,
        idp: Option<Arc<IdpClient>>,
        store: Option<Arc<dyn RefreshTokenStore>>,
    ) -> Result<Arc<Self>> {
        let policy = Arc::new(PolicyTable::new(&config)?);
        let codec = Arc::new(CookieCodec::new(&config.encryption_key)?);
        let claim_headers = compile_claim_headers(&config.add_claims);

        let upstream_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            // the proxy relays redirects to the client, it never follows them
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("upstream client: {e}")))?;

        Ok(Arc::new(Self {
            config: Arc::new(config),
            policy,
            codec,
            idp,
            store,
            upstream_client,
            claim_headers,
        }))
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let oauth = Router::new()
        .route("/authorize", get(authorize_handler))
        .route("/callback", get(callback_handler))
        .route("/login", post(login_handler))
        .route("/logout", get(logout_handler))
        .route("/health", get(health_handler))
        .layer(cors_layer(&state.config.cors));

    Router::new()
        .nest(&state.config.oauth_uri, oauth)
        .fallback(forward_handler)
        // layered inside-out: the last layer added runs first
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admission_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authentication_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            entry_point_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            security_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS layer for the OAuth sub-tree
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new();

    if !config.origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring unparsable CORS origin");
                    None
                }
            })
            .collect();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    if !config.methods.is_empty() {
        let methods: Vec<Method> = config
            .methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
            .collect();
        cors = cors.allow_methods(methods);
    }

    if !config.headers.is_empty() {
        let headers: Vec<HeaderName> = config
            .headers
            .iter()
            .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    if !config.exposed_headers.is_empty() {
        let exposed: Vec<HeaderName> = config
            .exposed_headers
            .iter()
            .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
            .collect();
        cors = cors.expose_headers(exposed);
    }

    if config.credentials {
        cors = cors.allow_credentials(true);
    }

    if let Some(max_age) = config.max_age {
        cors = cors.max_age(max_age);
    }

    cors
}
