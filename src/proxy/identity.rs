//! Per-request user identity parsed from an access token.
//!
//! The claims are read without signature verification here; the verifier
//! stage decides whether the token may be trusted. Role strings follow the
//! provider's two conventions: realm roles verbatim (`"vpn-user"`), client
//! roles namespaced as `"<client>:<role>"` (`"openvpn:dev-vpn"`).

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// The authenticated principal attached to a request.
///
/// Immutable for the lifetime of the request, except that the refresh stage
/// replaces it wholesale after a successful token exchange.
#[derive(Debug, Clone)]
pub struct UserContext {
    /// Subject identifier (`sub`)
    pub id: String,
    /// Email address
    pub email: String,
    /// Preferred username, falling back to the email address
    pub preferred_name: String,
    /// Token audience (`aud`)
    pub audience: String,
    /// Union of realm and client roles
    pub roles: Vec<String>,
    /// Access token expiry as a Unix timestamp
    pub expires_at: u64,
    /// The raw access token
    pub token: String,
    /// All token claims
    pub claims: Map<String, Value>,
    /// Whether the identity came from an Authorization header
    pub bearer: bool,
}

/// Wrapper type for the identity stored in request extensions
#[derive(Debug, Clone)]
pub struct Identity(pub UserContext);

impl UserContext {
    /// Whether the access token has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.expires_at <= now
    }

    /// Roles joined for the upstream header
    #[must_use]
    pub fn roles_list(&self) -> String {
        self.roles.join(",")
    }

    /// A claim value as a string, if present and a string
    #[must_use]
    pub fn claim_string(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// Parse the claims of a JWT and build a [`UserContext`].
///
/// # Errors
///
/// [`Error::NoTokenAudience`] when the `aud` claim is missing, the only
/// claim whose absence aborts extraction. Malformed tokens yield
/// [`Error::TokenInvalid`].
pub fn extract_identity(token: &str, bearer: bool) -> Result<UserContext> {
    let claims = decode_claims(token)?;

    let id = claims
        .get("sub")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let preferred_name = claims
        .get("preferred_username")
        .and_then(Value::as_str)
        .map_or_else(|| email.clone(), ToString::to_string);

    let audience = match claims.get("aud") {
        Some(Value::String(aud)) => aud.clone(),
        Some(Value::Array(list)) => list
            .iter()
            .find_map(Value::as_str)
            .ok_or(Error::NoTokenAudience)?
            .to_string(),
        _ => return Err(Error::NoTokenAudience),
    };

    let expires_at = claims.get("exp").and_then(as_unix_secs).unwrap_or_default();

    Ok(UserContext {
        id,
        email,
        preferred_name,
        audience,
        roles: extract_roles(&claims),
        expires_at,
        token: token.to_string(),
        claims,
        bearer,
    })
}

/// Decode the payload segment of a JWT without verifying the signature
fn decode_claims(token: &str) -> Result<Map<String, Value>> {
    let mut parts = token.split('.');
    let payload = parts
        .nth(1)
        .ok_or_else(|| Error::TokenInvalid("not a JWT".to_string()))?;

    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::TokenInvalid("payload is not base64url".to_string()))?;

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(Error::TokenInvalid("claims are not an object".to_string())),
        Err(e) => Err(Error::TokenInvalid(format!("claims are not JSON: {e}"))),
    }
}

/// Union of realm roles (verbatim) and client roles (`"<client>:<role>"`)
fn extract_roles(claims: &Map<String, Value>) -> Vec<String> {
    let mut roles = Vec::new();

    if let Some(realm) = claims.get("realm_access").and_then(Value::as_object) {
        if let Some(list) = realm.get("roles").and_then(Value::as_array) {
            roles.extend(list.iter().filter_map(Value::as_str).map(ToString::to_string));
        }
    }

    if let Some(accesses) = claims.get("resource_access").and_then(Value::as_object) {
        for (client, scopes) in accesses {
            let Some(list) = scopes
                .get("roles")
                .and_then(Value::as_array)
            else {
                continue;
            };
            roles.extend(
                list.iter()
                    .filter_map(Value::as_str)
                    .map(|role| format!("{client}:{role}")),
            );
        }
    }

    roles
}

fn as_unix_secs(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fake_token(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.fakesig")
    }

    fn base_claims() -> Value {
        json!({
            "jti": "4ee75b8e-3ee6-4382-92d4-3390b4b4937b",
            "iss": "https://idp.example.com/realms/commons",
            "aud": "test",
            "sub": "1e11e539-8256-4b3b-bda8-cc0d56cddb48",
            "exp": 4_102_444_800_u64,
            "email": "user@example.com",
            "preferred_username": "ruser",
            "given_name": "Example",
        })
    }

    #[test]
    fn extracts_standard_identity_claims() {
        let user = extract_identity(&fake_token(&base_claims()), false).unwrap();
        assert_eq!(user.id, "1e11e539-8256-4b3b-bda8-cc0d56cddb48");
        assert_eq!(user.email, "user@example.com");
        assert_eq!(user.preferred_name, "ruser");
        assert_eq!(user.audience, "test");
        assert!(!user.bearer);
        assert!(!user.is_expired());
    }

    #[test]
    fn preferred_name_falls_back_to_email() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("preferred_username");
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert_eq!(user.preferred_name, "user@example.com");
    }

    #[test]
    fn missing_audience_is_a_hard_failure() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("aud");
        let err = extract_identity(&fake_token(&claims), false).unwrap_err();
        assert!(matches!(err, Error::NoTokenAudience));
    }

    #[test]
    fn audience_array_takes_first_entry() {
        let mut claims = base_claims();
        claims["aud"] = json!(["account", "test"]);
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert_eq!(user.audience, "account");
    }

    #[test]
    fn merges_realm_and_client_roles() {
        let mut claims = base_claims();
        claims["realm_access"] = json!({"roles": ["vpn-user", "dsp-dev-vpn"]});
        claims["resource_access"] = json!({
            "openvpn": {"roles": ["dev-vpn"]},
        });
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert!(user.roles.contains(&"vpn-user".to_string()));
        assert!(user.roles.contains(&"dsp-dev-vpn".to_string()));
        assert!(user.roles.contains(&"openvpn:dev-vpn".to_string()));
        assert_eq!(user.roles.len(), 3);
    }

    #[test]
    fn missing_role_claims_mean_no_roles() {
        let user = extract_identity(&fake_token(&base_claims()), false).unwrap();
        assert!(user.roles.is_empty());
    }

    #[test]
    fn expired_token_reports_expired() {
        let mut claims = base_claims();
        claims["exp"] = json!(1_450_372_669_u64);
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert!(user.is_expired());
    }

    #[test]
    fn missing_exp_is_treated_as_expired() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("exp");
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert!(user.is_expired());
    }

    #[test]
    fn float_exp_is_accepted() {
        let mut claims = base_claims();
        claims["exp"] = json!(4_102_444_800.0_f64);
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert_eq!(user.expires_at, 4_102_444_800);
    }

    #[test]
    fn bearer_flag_is_carried() {
        let user = extract_identity(&fake_token(&base_claims()), true).unwrap();
        assert!(user.bearer);
    }

    #[test]
    fn garbage_token_is_invalid() {
        assert!(extract_identity("not-a-jwt", false).is_err());
        assert!(extract_identity("a.b.c", false).is_err());
    }

    #[test]
    fn claim_string_reads_only_strings() {
        let mut claims = base_claims();
        claims["number_claim"] = json!(42);
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert_eq!(user.claim_string("given_name"), Some("Example"));
        assert_eq!(user.claim_string("number_claim"), None);
        assert_eq!(user.claim_string("absent"), None);
    }

    #[test]
    fn roles_list_joins_with_commas() {
        let mut claims = base_claims();
        claims["realm_access"] = json!({"roles": ["a", "b"]});
        let user = extract_identity(&fake_token(&claims), false).unwrap();
        assert_eq!(user.roles_list(), "a,b");
    }
}
