//! Authentication middleware: identity extraction, verification and
//! transparent token refresh.
//!
//! The stage only runs for requests tagged by the entry-point middleware.
//! Verification distinguishes expiry from every other failure: expiry is the
//! one outcome the refresh coordinator can recover from. Bearer identities
//! are never refreshed; API clients are expected to obtain their own tokens.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use crate::idp::{IdpClient, TokenResponse, VerifyOutcome};
use crate::proxy::identity::{Identity, UserContext, extract_identity};
use crate::proxy::matcher::Enforced;
use crate::session::cookies::{self, header_cookie};
use crate::session::fingerprint;
use crate::{Error, Result};

use super::router::AppState;

/// Authentication middleware
pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // is authentication required on this uri?
    if request.extensions().get::<Enforced>().is_none() {
        debug!("Resource not protected, skipping authentication");
        return next.run(request).await;
    }

    let requested = request.uri().to_string();

    // grab the user identity from the request
    let user = match extract_from_request(&state, &request) {
        Ok(user) => user,
        Err(e) => {
            info!(error = %e, "No session found in request, redirecting for authorization");
            return redirect_to_authorization(&state, &requested);
        }
    };

    if state.config.skip_token_verification {
        warn!("Token verification disabled, for testing only");
        if user.is_expired() {
            info!(username = %user.preferred_name, "Session has expired and verification is off");
            return redirect_to_authorization(&state, &requested);
        }
        request.extensions_mut().insert(Identity(user));
        return next.run(request).await;
    }

    let Some(idp) = state.idp.clone() else {
        error!("No identity provider configured for verification");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    match idp.verify(&user.token).await {
        VerifyOutcome::Ok => {
            request.extensions_mut().insert(Identity(user));
            next.run(request).await
        }
        VerifyOutcome::Invalid(reason) => {
            error!(error = %reason, "Verification of the access token failed");
            access_forbidden()
        }
        VerifyOutcome::Expired => {
            handle_expired(&state, &idp, user, request, next, &requested).await
        }
    }
}

/// Refresh coordination for an expired access token
async fn handle_expired(
    state: &Arc<AppState>,
    idp: &Arc<IdpClient>,
    user: UserContext,
    mut request: Request<Body>,
    next: Next,
    requested: &str,
) -> Response {
    let config = &state.config;

    if !config.enable_refresh_tokens {
        info!(email = %user.email, "Session has expired and refreshing is disabled");
        return redirect_to_authorization(state, requested);
    }

    // bearer credentials are the client's to renew
    if user.bearer {
        info!(email = %user.email, "Session has expired and we are using bearer tokens");
        return redirect_to_authorization(state, requested);
    }

    let refresh_token = match locate_refresh_token(state, request.headers(), &user).await {
        Ok(token) => token,
        Err(e) => {
            info!(email = %user.email, error = %e, "Unable to find a refresh token for the user");
            return redirect_to_authorization(state, requested);
        }
    };

    debug!(email = %user.email, "Found a refresh token, attempting to refresh access token");

    let tokens = match idp.refresh(&refresh_token).await {
        Ok(tokens) => tokens,
        Err(Error::RefreshExpired) => {
            warn!(email = %user.email, "The refresh token has expired");
            let mut response = redirect_to_authorization(state, requested);
            cookies::clear_all_cookies(&mut response, config);
            return response;
        }
        Err(e) => {
            // transient provider failure: keep the session cookies intact
            error!(error = %e, "Failed to refresh the access token");
            return redirect_to_authorization(state, requested);
        }
    };

    match install_refreshed_session(state, &user, &tokens, &refresh_token) {
        Ok((refreshed, staged_cookies)) => {
            info!(
                email = %refreshed.email,
                expires_at = refreshed.expires_at,
                "Injecting refreshed access token"
            );
            request.extensions_mut().insert(Identity(refreshed));
            let mut response = next.run(request).await;
            for cookie in staged_cookies {
                if let Ok(value) = cookie.parse() {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to install the refreshed session");
            redirect_to_authorization(state, requested)
        }
    }
}

/// Stage the new session cookies and dispatch the background store update.
///
/// The cookie values are staged before the store task is spawned, so the
/// client's next request carries the new access token no matter how the
/// store write fares. The task deletes the old fingerprint before writing
/// the new one; a crash in between leaves at most a missing entry, which
/// fails closed into re-authentication.
fn install_refreshed_session(
    state: &Arc<AppState>,
    old_user: &UserContext,
    tokens: &TokenResponse,
    refresh_token: &str,
) -> Result<(UserContext, Vec<String>)> {
    let config = &state.config;
    let refreshed = extract_identity(&tokens.access_token, false)?;

    let sealed_access = state.codec.encode(&tokens.access_token)?;
    let mut staged = vec![cookies::session_cookie(
        &config.cookie_access_name,
        &sealed_access,
        config.idle_duration,
        config.secure_cookie,
    )];

    if let Some(store) = state.store.clone() {
        let old_fingerprint = fingerprint(&old_user.token);
        let new_fingerprint = fingerprint(&tokens.access_token);
        let refresh = refresh_token.to_string();
        let ttl = tokens
            .refresh_expires_in
            .map_or(config.refresh_duration(), Duration::from_secs);

        // fire and forget: the request must not wait on store IO
        tokio::spawn(async move {
            if let Err(e) = store.delete(&old_fingerprint).await {
                error!(error = %e, "Unable to delete the old refresh token from the store");
            }
            if let Err(e) = store.put(&new_fingerprint, &refresh, ttl).await {
                error!(error = %e, "Failed to place the refresh token in the store");
            }
        });
    } else {
        let sealed_refresh = state.codec.encode(refresh_token)?;
        staged.push(cookies::session_cookie(
            &config.cookie_refresh_name,
            &sealed_refresh,
            config.refresh_duration(),
            config.secure_cookie,
        ));
    }

    Ok((refreshed, staged))
}

/// Pull the identity out of the Authorization header or the session cookie
fn extract_from_request(state: &AppState, request: &Request<Body>) -> Result<UserContext> {
    if let Some(value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
        {
            return extract_identity(token, true);
        }
    }

    let sealed = header_cookie(request.headers(), &state.config.cookie_access_name)
        .ok_or(Error::NoSession)?;
    // a cookie that fails authentication is treated as absent
    let token = state.codec.decode(&sealed).map_err(|_| Error::NoSession)?;
    extract_identity(&token, false)
}

/// Locate the refresh token for the current session
async fn locate_refresh_token(
    state: &AppState,
    headers: &HeaderMap,
    user: &UserContext,
) -> Result<String> {
    if let Some(ref store) = state.store {
        return store
            .get(&fingerprint(&user.token))
            .await?
            .ok_or(Error::NoSession);
    }

    let sealed =
        header_cookie(headers, &state.config.cookie_refresh_name).ok_or(Error::NoSession)?;
    state.codec.decode(&sealed).map_err(|_| Error::NoSession)
}

/// Terminate the request towards re-authentication: a 307 to the authorize
/// endpoint carrying the requested URI, or a plain 401 with `no_redirects`
pub fn redirect_to_authorization(state: &AppState, requested: &str) -> Response {
    if state.config.no_redirects {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let encoded: String = form_urlencoded::byte_serialize(requested.as_bytes()).collect();
    let location = format!("{}?state={encoded}", state.config.oauth_path("authorize"));
    Redirect::temporary(&location).into_response()
}

/// Terminate the request with an empty 403
pub fn access_forbidden() -> Response {
    StatusCode::FORBIDDEN.into_response()
}