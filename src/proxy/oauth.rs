//! OAuth endpoint handlers under the reserved sub-tree.
//!
//! These endpoints are deliberately outside the admission pipeline: the
//! entry-point stage never gates the reserved prefix, so an unauthenticated
//! browser can always reach the login machinery.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::idp::VerifyOutcome;
use crate::session::cookies::{self, header_cookie};
use crate::session::fingerprint;

use super::router::AppState;

/// Query parameters for `GET /oauth/authorize`
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    /// Path the browser is sent back to after login
    pub state: Option<String>,
}

/// Query parameters for `GET /oauth/callback`
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code issued by the provider
    pub code: Option<String>,
    /// Path the browser is sent back to after login
    pub state: Option<String>,
}

/// Form body for `POST /oauth/login`
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    /// Resource-owner username
    pub username: String,
    /// Resource-owner password
    pub password: String,
}

/// GET /oauth/health - liveness probe
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK\n")
}

/// GET /oauth/authorize - 307 to the provider's authorization endpoint
pub async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Some(idp) = state.idp.as_ref() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let return_to = sanitize_return_path(params.state.as_deref());
    match idp.authorization_url(&state.config.redirect_uri(), &return_to) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build the authorization URL");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /oauth/callback - exchange the code, establish the session cookies
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(idp) = state.idp.as_ref() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let Some(code) = params.code else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let tokens = match idp.exchange_code(&code, &state.config.redirect_uri()).await {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(error = %e, "Authorization code exchange failed");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    if !state.config.skip_token_verification {
        match idp.verify(&tokens.access_token).await {
            VerifyOutcome::Ok => {}
            outcome => {
                error!(outcome = ?outcome, "Token issued by the provider failed verification");
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }

    let sealed_access = match state.codec.encode(&tokens.access_token) {
        Ok(sealed) => sealed,
        Err(e) => {
            error!(error = %e, "Failed to seal the access cookie");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let return_to = sanitize_return_path(params.state.as_deref());
    let mut response = Redirect::temporary(&return_to).into_response();
    cookies::drop_access_cookie(&mut response, &state.config, &sealed_access);

    if let Some(ref refresh_token) = tokens.refresh_token {
        let ttl = tokens
            .refresh_expires_in
            .map_or(state.config.refresh_duration(), Duration::from_secs);

        if let Some(ref store) = state.store {
            let key = fingerprint(&tokens.access_token);
            if let Err(e) = store.put(&key, refresh_token, ttl).await {
                // best effort: a missing entry later means one extra login
                error!(error = %e, "Failed to store the refresh token");
            }
        } else {
            match state.codec.encode(refresh_token) {
                Ok(sealed_refresh) => {
                    cookies::drop_refresh_cookie(&mut response, &state.config, &sealed_refresh);
                }
                Err(e) => error!(error = %e, "Failed to seal the refresh cookie"),
            }
        }
    }

    info!("Login complete, session established");
    response
}

/// POST /oauth/login - resource-owner password-credentials grant
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    if !state.config.enable_login_handler {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(idp) = state.idp.as_ref() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match idp.password_grant(&form.username, &form.password).await {
        Ok(tokens) => Json(json!({
            "access_token": tokens.access_token,
            "token_type": tokens.token_type.unwrap_or_else(|| "Bearer".to_string()),
            "expires_in": tokens.expires_in,
            "refresh_token": tokens.refresh_token,
        }))
        .into_response(),
        Err(e) => {
            warn!(username = %form.username, error = %e, "Password grant failed");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// GET /oauth/logout - revoke the refresh token and clear the session
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(sealed) = header_cookie(&headers, &state.config.cookie_access_name) {
        if let Ok(token) = state.codec.decode(&sealed) {
            revoke_session(&state, &headers, &token).await;
        }
    }

    let mut response = Redirect::to("/").into_response();
    cookies::clear_all_cookies(&mut response, &state.config);
    info!("Session cleared");
    response
}

/// Best-effort revocation of the session's refresh token
async fn revoke_session(state: &AppState, headers: &HeaderMap, access_token: &str) {
    let refresh_token = if let Some(ref store) = state.store {
        let key = fingerprint(access_token);
        let found = store.get(&key).await.ok().flatten();
        if let Err(e) = store.delete(&key).await {
            error!(error = %e, "Failed to drop the refresh token from the store");
        }
        found
    } else {
        header_cookie(headers, &state.config.cookie_refresh_name)
            .and_then(|sealed| state.codec.decode(&sealed).ok())
    };

    let (Some(refresh_token), Some(idp)) = (refresh_token, state.idp.as_ref()) else {
        return;
    };
    if let Err(e) = idp.revoke(&refresh_token).await {
        warn!(error = %e, "Refresh token revocation failed");
    }
}

/// Only same-site absolute paths may be used as a post-login target
fn sanitize_return_path(state: Option<&str>) -> String {
    match state {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => "/".to_string(),
    }
}
