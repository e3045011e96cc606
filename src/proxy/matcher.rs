//! Resource matching: the entry-point stage of the admission pipeline.
//!
//! The policy table is compiled once at startup and never mutated; matching
//! walks the resources in declaration order and the first prefix hit wins,
//! so operators control precedence through ordering.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use regex::Regex;
use tracing::debug;

use crate::config::{Config, Resource};
use crate::{Error, Result};

use super::router::AppState;

/// Marker inserted into the request context when a resource gates the request
#[derive(Debug, Clone)]
pub struct Enforced(pub Arc<Resource>);

/// How a request path relates to the policy table
#[derive(Debug)]
pub enum RouteDecision<'a> {
    /// No resource covers the request; pass through without identity
    Unprotected,
    /// A whitelisted resource covers the request; skip all auth stages
    Whitelisted,
    /// The request must pass authentication and admission for this resource
    Protected(&'a Resource),
}

/// Compiled access policy: ordered resources plus claim-match regexes
pub struct PolicyTable {
    resources: Vec<Resource>,
    claim_matches: Vec<(String, Regex)>,
    oauth_prefix: String,
}

impl PolicyTable {
    /// Compile the policy from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when a claim-match pattern does not compile.
    pub fn new(config: &Config) -> Result<Self> {
        let mut claim_matches = Vec::with_capacity(config.match_claims.len());
        for (claim, pattern) in &config.match_claims {
            // anchor so a partial hit cannot satisfy the claim requirement
            let compiled = Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|e| Error::Config(format!("match_claims[{claim}]: {e}")))?;
            claim_matches.push((claim.clone(), compiled));
        }

        Ok(Self {
            resources: config.resources.clone(),
            claim_matches,
            oauth_prefix: config.oauth_uri.clone(),
        })
    }

    /// Match a request path and method against the table
    #[must_use]
    pub fn match_request(&self, path: &str, method: &str) -> RouteDecision<'_> {
        // the OAuth sub-tree is never gated
        if path.starts_with(&self.oauth_prefix) {
            return RouteDecision::Unprotected;
        }

        for resource in &self.resources {
            if !path.starts_with(resource.url.as_str()) {
                continue;
            }
            if resource.white_listed {
                return RouteDecision::Whitelisted;
            }
            let gated = resource.methods.is_empty()
                || resource
                    .methods
                    .iter()
                    .any(|m| m == "ANY" || m.eq_ignore_ascii_case(method));
            return if gated {
                RouteDecision::Protected(resource)
            } else {
                RouteDecision::Unprotected
            };
        }

        RouteDecision::Unprotected
    }

    /// Compiled claim-name to regex pairs checked at admission
    #[must_use]
    pub fn claim_matches(&self) -> &[(String, Regex)] {
        &self.claim_matches
    }
}

/// Entry-point middleware: tags protected requests with their resource
pub async fn entry_point_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();

    match state.policy.match_request(&path, &method) {
        RouteDecision::Protected(resource) => {
            debug!(path = %path, resource = %resource.url, "Request requires authentication");
            request
                .extensions_mut()
                .insert(Enforced(Arc::new(resource.clone())));
        }
        RouteDecision::Whitelisted => {
            debug!(path = %path, "Whitelisted resource, skipping auth");
        }
        RouteDecision::Unprotected => {}
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(resources: Vec<Resource>) -> PolicyTable {
        let config = Config {
            resources,
            ..Config::default()
        };
        PolicyTable::new(&config).unwrap()
    }

    fn resource(url: &str, methods: &[&str], roles: &[&str]) -> Resource {
        Resource {
            url: url.to_string(),
            methods: methods.iter().map(ToString::to_string).collect(),
            roles: roles.iter().map(ToString::to_string).collect(),
            white_listed: false,
        }
    }

    #[test]
    fn first_declared_prefix_wins() {
        let table = table(vec![
            Resource {
                white_listed: true,
                ..resource("/admin/white_listed", &[], &[])
            },
            resource("/admin", &["GET"], &["admin"]),
        ]);

        assert!(matches!(
            table.match_request("/admin/white_listed/x", "GET"),
            RouteDecision::Whitelisted
        ));
        assert!(matches!(
            table.match_request("/admin/other", "GET"),
            RouteDecision::Protected(r) if r.url == "/admin"
        ));
    }

    #[test]
    fn declaration_order_shadows_later_entries() {
        // the broad entry comes first, so the narrower one never matches
        let table = table(vec![
            resource("/admin", &["GET"], &["admin"]),
            resource("/admin/special", &["GET"], &["special"]),
        ]);

        assert!(matches!(
            table.match_request("/admin/special/x", "GET"),
            RouteDecision::Protected(r) if r.roles == vec!["admin".to_string()]
        ));
    }

    #[test]
    fn method_not_covered_is_unprotected() {
        let table = table(vec![resource("/admin", &["GET"], &["admin"])]);
        assert!(matches!(
            table.match_request("/admin/x", "POST"),
            RouteDecision::Unprotected
        ));
    }

    #[test]
    fn any_sentinel_covers_all_methods() {
        let table = table(vec![resource("/auth_all", &["ANY"], &[])]);
        for method in ["GET", "POST", "PUT", "DELETE", "PATCH"] {
            assert!(matches!(
                table.match_request("/auth_all/x", method),
                RouteDecision::Protected(_)
            ));
        }
    }

    #[test]
    fn empty_methods_covers_all_methods() {
        let table = table(vec![resource("/secure", &[], &["user"])]);
        assert!(matches!(
            table.match_request("/secure", "DELETE"),
            RouteDecision::Protected(_)
        ));
    }

    #[test]
    fn unmatched_path_is_unprotected() {
        let table = table(vec![resource("/admin", &["GET"], &["admin"])]);
        assert!(matches!(
            table.match_request("/public/page", "GET"),
            RouteDecision::Unprotected
        ));
    }

    #[test]
    fn oauth_subtree_short_circuits() {
        let table = table(vec![resource("/", &["ANY"], &["user"])]);
        assert!(matches!(
            table.match_request("/oauth/callback", "GET"),
            RouteDecision::Unprotected
        ));
        assert!(matches!(
            table.match_request("/other", "GET"),
            RouteDecision::Protected(_)
        ));
    }

    #[test]
    fn method_match_is_case_insensitive() {
        let table = table(vec![resource("/admin", &["get"], &["admin"])]);
        assert!(matches!(
            table.match_request("/admin", "GET"),
            RouteDecision::Protected(_)
        ));
    }

    #[test]
    fn bad_claim_regex_fails_compile() {
        let mut config = Config::default();
        config
            .match_claims
            .insert("iss".to_string(), "[unclosed".to_string());
        assert!(PolicyTable::new(&config).is_err());
    }

    #[test]
    fn claim_regexes_are_anchored() {
        let mut config = Config::default();
        config
            .match_claims
            .insert("environment".to_string(), "dev".to_string());
        let table = PolicyTable::new(&config).unwrap();
        let (_, regex) = &table.claim_matches()[0];
        assert!(regex.is_match("dev"));
        assert!(!regex.is_match("devops"));
    }
}
