//! Access-token verification: JWT signature validation and JWKS caching.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Fetch the provider's JWKS (cached for 1 hour; refreshed once on an
//!    unknown `kid`).
//! 3. Verify the signature and the `exp`/`iss` claims.
//!
//! Expiry is a distinguished outcome: it is the only verification failure the
//! pipeline can recover from (by refreshing the token), so it must not be
//! folded into the generic invalid case.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation, errors::ErrorKind,
    jwk::{AlgorithmParameters, JwkSet},
};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Outcome of verifying an access token
#[derive(Debug)]
pub enum VerifyOutcome {
    /// Signature and claims are valid
    Ok,
    /// Signature is valid but the token has expired
    Expired,
    /// Anything else: bad signature, wrong issuer, malformed token
    Invalid(String),
}

impl VerifyOutcome {
    /// True when the outcome is [`VerifyOutcome::Ok`]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Cached JWKS entry
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedJwks {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// Verifies access tokens against the provider's published key set
pub struct TokenVerifier {
    http: reqwest::Client,
    issuer: String,
    jwks_uri: String,
    cache: DashMap<String, CachedJwks>,
    /// How long to cache a fetched JWKS
    cache_ttl: Duration,
}

impl TokenVerifier {
    /// Create a verifier for one issuer
    #[must_use]
    pub fn new(http: reqwest::Client, issuer: String, jwks_uri: String) -> Self {
        Self {
            http,
            issuer,
            jwks_uri,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(3600),
        }
    }

    /// Verify a raw JWT and classify the result
    pub async fn verify(&self, token: &str) -> VerifyOutcome {
        let header = match jsonwebtoken::decode_header(token) {
            Ok(header) => header,
            Err(e) => return VerifyOutcome::Invalid(format!("malformed token header: {e}")),
        };

        let Some(kid) = header.kid.clone() else {
            return VerifyOutcome::Invalid("token header has no kid".to_string());
        };

        let key = match self.find_decoding_key(&kid).await {
            Ok(key) => key,
            Err(e) => return VerifyOutcome::Invalid(e.to_string()),
        };

        let validation = self.build_validation(&header);

        match jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation) {
            Ok(TokenData { .. }) => VerifyOutcome::Ok,
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => VerifyOutcome::Expired,
            Err(e) => VerifyOutcome::Invalid(e.to_string()),
        }
    }

    /// Find a decoding key by `kid`, refreshing the JWKS cache if not found
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwks = self.get_or_fetch_jwks(false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        // Unknown kid: refresh once and retry
        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.get_or_fetch_jwks(true).await?;
        find_key_in_jwks(&jwks, kid)
            .ok_or_else(|| Error::TokenInvalid(format!("unknown key id: {kid}")))
    }

    async fn get_or_fetch_jwks(&self, force_refresh: bool) -> Result<JwkSet> {
        if !force_refresh {
            if let Some(cached) = self.cache.get(&self.issuer) {
                if !cached.is_stale() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(issuer = %self.issuer, "Fetching JWKS from {}", self.jwks_uri);
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::Idp(format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Idp(format!("jwks parse: {e}")))?;

        self.cache.insert(
            self.issuer.clone(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
                ttl: self.cache_ttl,
            },
        );

        Ok(jwks)
    }

    fn build_validation(&self, header: &Header) -> Validation {
        let alg = match header.alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::HS256
            | Algorithm::HS384
            | Algorithm::HS512 => header.alg,
            other => {
                warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
                Algorithm::RS256
            }
        };

        let mut validation = Validation::new(alg);
        validation.leeway = 60; // clock skew tolerance
        validation.set_issuer(&[&self.issuer]);
        // the audience pin is an admission decision, not a verification one
        validation.validate_aud = false;
        validation
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(oct) => {
                use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
                URL_SAFE_NO_PAD
                    .decode(&oct.value)
                    .ok()
                    .map(|secret| DecodingKey::from_secret(&secret))
            }
            AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}
