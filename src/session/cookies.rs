//! Session cookie construction.
//!
//! Cookies are assembled as raw `Set-Cookie` values; the access cookie lives
//! for the configured idle duration and the refresh cookie for twice that.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Response, header};

use crate::config::Config;

/// Build a session cookie value with the standard flags
#[must_use]
pub fn session_cookie(name: &str, value: &str, ttl: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a cookie value that deletes the named cookie
#[must_use]
pub fn expired_cookie(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

/// Append the encrypted access-token cookie to a response
pub fn drop_access_cookie<B>(response: &mut Response<B>, config: &Config, sealed: &str) {
    append_cookie(
        response,
        &session_cookie(
            &config.cookie_access_name,
            sealed,
            config.idle_duration,
            config.secure_cookie,
        ),
    );
}

/// Append the encrypted refresh-token cookie to a response
pub fn drop_refresh_cookie<B>(response: &mut Response<B>, config: &Config, sealed: &str) {
    append_cookie(
        response,
        &session_cookie(
            &config.cookie_refresh_name,
            sealed,
            config.refresh_duration(),
            config.secure_cookie,
        ),
    );
}

/// Delete both session cookies
pub fn clear_all_cookies<B>(response: &mut Response<B>, config: &Config) {
    append_cookie(response, &expired_cookie(&config.cookie_access_name));
    append_cookie(response, &expired_cookie(&config.cookie_refresh_name));
}

fn append_cookie<B>(response: &mut Response<B>, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// Extract a named cookie value from a `Cookie` request header
#[must_use]
pub fn request_cookie<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}

/// Find a named cookie across all `Cookie` headers of a request
#[must_use]
pub fn header_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|header| request_cookie(header, name))
        .map(ToString::to_string)
}
