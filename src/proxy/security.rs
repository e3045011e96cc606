//! Security filter: host allowlist and browser protection headers.
//!
//! Runs before every other stage. A request whose `Host` header is not in
//! the configured allowlist never reaches the pipeline.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::router::AppState;

/// Middleware applying the host allowlist and standard security headers
pub async fn security_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let hostnames = &state.config.hostnames;
    if !hostnames.is_empty() {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !host_allowed(hostnames, host) {
            warn!(host = %host, "Request host not in the allowlist");
            return StatusCode::BAD_REQUEST.into_response();
        }
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );

    response
}

/// Check a Host header against the allowlist, with and without the port
fn host_allowed(allowed: &[String], host: &str) -> bool {
    let bare = host.split(':').next().unwrap_or(host);
    allowed.iter().any(|h| h == host || h == bare)
}
