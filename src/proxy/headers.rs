//! Upstream identity header injection.
//!
//! Every admitted request reaches the upstream with a fixed set of `X-Auth-*`
//! headers and a rewritten `Authorization` header. Client-supplied values for
//! these names never survive; the forwarder strips inbound `X-Auth-*` before
//! injection.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::proxy::identity::UserContext;

/// Turn a claim name into its `X-Auth-*` header suffix:
/// `given_name` becomes `Given-Name`
#[must_use]
pub fn to_header(claim: &str) -> String {
    claim
        .split('_')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Precompute the `claim name → header name` table for `add_claims`
#[must_use]
pub fn compile_claim_headers(add_claims: &[String]) -> Vec<(String, String)> {
    add_claims
        .iter()
        .map(|claim| (claim.clone(), format!("x-auth-{}", to_header(claim).to_lowercase())))
        .collect()
}

/// Remove every `X-Auth-*` header the client may have supplied
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    let stale: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("x-auth-"))
        .cloned()
        .collect();
    for name in stale {
        headers.remove(&name);
    }
}

/// Stamp the upstream identity headers for an authenticated user
pub fn inject_identity_headers(
    headers: &mut HeaderMap,
    user: &UserContext,
    claim_headers: &[(String, String)],
) {
    set(headers, "x-auth-userid", &user.preferred_name);
    set(headers, "x-auth-subject", &user.id);
    set(headers, "x-auth-username", &user.preferred_name);
    set(headers, "x-auth-email", &user.email);
    set(headers, "x-auth-expiresin", &user.expires_at.to_string());
    set(headers, "x-auth-token", &user.token);
    set(headers, "x-auth-roles", &user.roles_list());
    set(headers, "authorization", &format!("Bearer {}", user.token));

    for (claim, header) in claim_headers {
        let Some(value) = user.claims.get(claim) else {
            continue;
        };
        // claims may be any JSON type; header carries the stringified value
        let rendered = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(header.as_str()),
            HeaderValue::from_str(&rendered),
        ) {
            headers.insert(name, value);
        }
    }
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!(header = name, "Skipping header with invalid value"),
    }
}
