//! Identity-provider client.
//!
//! Wraps the provider's OIDC discovery document and token endpoint: code
//! exchange, refresh grant, password grant and revocation. All requests share
//! one `reqwest` client; retries are the transport's concern, not ours.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::verifier::{TokenVerifier, VerifyOutcome};
use crate::{Error, Result};

/// OIDC provider metadata (the discovery document subset we consume)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer URL, matched against the token `iss` claim
    pub issuer: String,
    /// Authorization endpoint URL
    pub authorization_endpoint: String,
    /// Token endpoint URL
    pub token_endpoint: String,
    /// JWKS URL for signature verification
    pub jwks_uri: String,
    /// Token revocation endpoint (optional)
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The new access token
    pub access_token: String,
    /// Token type, usually "Bearer"
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, when the grant issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    /// ID token, when `openid` scope was granted
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Error payload returned by the token endpoint
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for one OIDC identity provider
pub struct IdpClient {
    http: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: String,
    verifier: TokenVerifier,
}

impl IdpClient {
    /// Discover the provider's endpoints and build a client
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery document is unreachable or missing
    /// mandatory endpoints.
    pub async fn discover(
        http: Client,
        discovery_url: &str,
        client_id: String,
        client_secret: String,
    ) -> Result<Self> {
        let url = if discovery_url.ends_with("/.well-known/openid-configuration") {
            discovery_url.to_string()
        } else {
            format!(
                "{}/.well-known/openid-configuration",
                discovery_url.trim_end_matches('/')
            )
        };
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Idp(format!("discovery fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Idp(format!(
                "discovery failed: HTTP {}",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| Error::Idp(format!("discovery parse failed: {e}")))?;

        info!(issuer = %metadata.issuer, "Discovered identity provider");
        Ok(Self::from_metadata(http, metadata, client_id, client_secret))
    }

    /// Build a client from known endpoints (no discovery round-trip)
    #[must_use]
    pub fn from_metadata(
        http: Client,
        metadata: ProviderMetadata,
        client_id: String,
        client_secret: String,
    ) -> Self {
        let verifier = TokenVerifier::new(
            http.clone(),
            metadata.issuer.clone(),
            metadata.jwks_uri.clone(),
        );
        Self {
            http,
            metadata,
            client_id,
            client_secret,
            verifier,
        }
    }

    /// Provider metadata in use
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Verify an access token against the provider's key set
    pub async fn verify(&self, token: &str) -> VerifyOutcome {
        self.verifier.verify(token).await
    }

    /// Build the authorization URL the browser is redirected to
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| Error::Idp(format!("invalid authorization endpoint: {e}")))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", "openid email profile")
            .append_pair("state", state);

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri);
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());

        self.token_request(&params, false).await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// [`Error::RefreshExpired`] when the provider rejects the grant as
    /// expired or revoked (`invalid_grant`); [`Error::RefreshFailed`] for
    /// anything transient.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());

        self.token_request(&params, true).await
    }

    /// Resource-owner password-credentials grant
    pub async fn password_grant(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "password");
        params.insert("username", username);
        params.insert("password", password);
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());

        self.token_request(&params, false).await
    }

    /// Revoke a refresh token; missing revocation support is not an error
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let Some(ref endpoint) = self.metadata.revocation_endpoint else {
            debug!("Provider exposes no revocation endpoint, skipping");
            return Ok(());
        };

        let mut params = HashMap::new();
        params.insert("token", refresh_token);
        params.insert("token_type_hint", "refresh_token");
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());

        let response = self
            .http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Idp(format!("revocation request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Idp(format!(
                "revocation failed: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn token_request(
        &self,
        params: &HashMap<&str, &str>,
        is_refresh: bool,
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                if is_refresh {
                    Error::RefreshFailed(e.to_string())
                } else {
                    Error::Idp(format!("token request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<TokenErrorResponse> = serde_json::from_str(&body).ok();

            // an invalid_grant on refresh means the refresh token is dead
            if is_refresh {
                if let Some(ref err) = parsed {
                    if err.error == "invalid_grant" {
                        return Err(Error::RefreshExpired);
                    }
                }
                return Err(Error::RefreshFailed(format!("HTTP {status} - {body}")));
            }

            let detail = parsed
                .and_then(|e| e.error_description)
                .unwrap_or(body);
            return Err(Error::Idp(format!("token grant failed: HTTP {status} - {detail}")));
        }

        response.json().await.map_err(|e| {
            if is_refresh {
                Error::RefreshFailed(format!("bad token response: {e}"))
            } else {
                Error::Idp(format!("bad token response: {e}"))
            }
        })
    }
}
