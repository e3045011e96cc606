//! Admission: checks the authenticated identity against the matched
//! resource: audience pin, required roles, claim predicates.
//!
//! Every failure here is final for the request (403, no redirect, no cookie
//! mutation).

use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tracing::{debug, warn};

use crate::config::{Config, Resource};
use crate::proxy::identity::{Identity, UserContext};
use crate::proxy::matcher::{Enforced, PolicyTable};

use super::auth::access_forbidden;
use super::router::AppState;

/// Why admission turned a request away
#[derive(Debug, PartialEq, Eq)]
pub enum Denial {
    /// Token audience does not match the configured client id
    Audience,
    /// A required role is missing
    Roles,
    /// A claim predicate failed or the claim is absent
    Claim(String),
}

/// Admission middleware
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (resource, user) = {
        let Some(Enforced(resource)) = request.extensions().get::<Enforced>() else {
            return next.run(request).await;
        };
        let user = request
            .extensions()
            .get::<Identity>()
            .map(|Identity(user)| user.clone())
            .expect("protected request reached admission without an identity");
        (Arc::clone(resource), user)
    };

    match admit(&user, &resource, &state.policy, &state.config) {
        Ok(()) => {
            debug!(
                username = %user.preferred_name,
                resource = %resource.url,
                "Resource access permitted"
            );
            next.run(request).await
        }
        Err(Denial::Audience) => {
            warn!(
                username = %user.preferred_name,
                issued = %user.audience,
                client_id = %state.config.client_id,
                "Access token audience is not us"
            );
            access_forbidden()
        }
        Err(Denial::Roles) => {
            warn!(
                access = "denied",
                username = %user.preferred_name,
                resource = %resource.url,
                required = %resource.roles_list(),
                "Access denied, invalid roles"
            );
            access_forbidden()
        }
        Err(Denial::Claim(claim)) => {
            warn!(
                access = "denied",
                username = %user.preferred_name,
                resource = %resource.url,
                claim = %claim,
                "Access denied, token claim does not satisfy the requirement"
            );
            access_forbidden()
        }
    }
}

/// Evaluate the admission checks in order: audience, roles, claim matches
pub fn admit(
    user: &UserContext,
    resource: &Resource,
    policy: &PolicyTable,
    config: &Config,
) -> Result<(), Denial> {
    if !config.client_id.is_empty()
        && !config.skip_client_id
        && user.audience != config.client_id
    {
        return Err(Denial::Audience);
    }

    if !resource.roles.is_empty() && !has_roles(&resource.roles, &user.roles) {
        return Err(Denial::Roles);
    }

    for (claim, regex) in policy.claim_matches() {
        let Some(value) = user.claim_string(claim) else {
            return Err(Denial::Claim(claim.clone()));
        };
        if !regex.is_match(value) {
            return Err(Denial::Claim(claim.clone()));
        }
    }

    Ok(())
}

/// Every required role must be held; ordering is irrelevant
fn has_roles(required: &[String], held: &[String]) -> bool {
    required.iter().all(|role| held.contains(role))
}
