//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Length in bytes of the cookie encryption key (AES-256)
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the proxy listens on
    pub listen: String,
    /// Base URL of the upstream service requests are forwarded to
    pub upstream: String,
    /// OIDC discovery document URL of the identity provider
    pub discovery_url: String,
    /// OAuth client identifier; also pins the expected token audience
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Externally visible base URL used to build the OAuth callback address
    pub redirection_url: String,
    /// Reserved path prefix hosting the OAuth endpoints
    pub oauth_uri: String,
    /// Disable the audience pin against `client_id`
    pub skip_client_id: bool,
    /// Bypass signature and issuer verification (testing only; expiry is
    /// still enforced locally)
    pub skip_token_verification: bool,
    /// Exchange stored refresh tokens for new access tokens on expiry
    pub enable_refresh_tokens: bool,
    /// Expose `POST /oauth/login` (resource-owner password grant)
    pub enable_login_handler: bool,
    /// 32-byte key for session cookie encryption
    pub encryption_key: String,
    /// Name of the access-token cookie
    pub cookie_access_name: String,
    /// Name of the refresh-token cookie
    pub cookie_refresh_name: String,
    /// Set the `Secure` flag on session cookies
    pub secure_cookie: bool,
    /// TTL of the access cookie; the refresh cookie lives twice as long
    #[serde(with = "humantime_serde")]
    pub idle_duration: Duration,
    /// Timeout for upstream requests
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
    /// Timeout for identity-provider requests
    #[serde(with = "humantime_serde")]
    pub idp_timeout: Duration,
    /// Refresh-token store URL (`redis://`, `file://` or `memory://`);
    /// unset means refresh tokens live in the session cookie
    pub store_url: Option<String>,
    /// Protected resource entries, matched in declaration order
    pub resources: Vec<Resource>,
    /// Claim name to regex table checked at admission
    pub match_claims: HashMap<String, String>,
    /// Static headers appended to every upstream request
    pub headers: HashMap<String, String>,
    /// Claims injected upstream as `X-Auth-*` headers
    pub add_claims: Vec<String>,
    /// CORS applied to the OAuth sub-tree
    pub cors: CorsConfig,
    /// Host header allowlist; empty disables the check
    pub hostnames: Vec<String>,
    /// Respond 401 instead of redirecting unauthenticated browser clients
    pub no_redirects: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            upstream: String::new(),
            discovery_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirection_url: String::new(),
            oauth_uri: "/oauth".to_string(),
            skip_client_id: false,
            skip_token_verification: false,
            enable_refresh_tokens: false,
            enable_login_handler: false,
            encryption_key: String::new(),
            cookie_access_name: "kc-access".to_string(),
            cookie_refresh_name: "kc-state".to_string(),
            secure_cookie: false,
            idle_duration: Duration::from_secs(3600),
            upstream_timeout: Duration::from_secs(30),
            idp_timeout: Duration::from_secs(10),
            store_url: None,
            resources: Vec::new(),
            match_claims: HashMap::new(),
            headers: HashMap::new(),
            add_claims: Vec::new(),
            cors: CorsConfig::default(),
            hostnames: Vec::new(),
            no_redirects: false,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTHGATE_ prefix)
        figment = figment.merge(Env::prefixed("AUTHGATE_").split("__"));

        // validation happens once CLI overrides have been applied
        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.upstream.is_empty() {
            return Err(Error::Config("upstream is required".to_string()));
        }
        Url::parse(&self.upstream)
            .map_err(|e| Error::Config(format!("invalid upstream url: {e}")))?;

        if self.encryption_key.len() != ENCRYPTION_KEY_LEN {
            return Err(Error::Config(format!(
                "encryption_key must be exactly {ENCRYPTION_KEY_LEN} bytes, got {}",
                self.encryption_key.len()
            )));
        }

        if !self.skip_token_verification {
            if self.discovery_url.is_empty() {
                return Err(Error::Config(
                    "discovery_url is required unless skip_token_verification is set".to_string(),
                ));
            }
            if self.client_id.is_empty() {
                return Err(Error::Config("client_id is required".to_string()));
            }
        }

        if !self.oauth_uri.starts_with('/') {
            return Err(Error::Config("oauth_uri must start with '/'".to_string()));
        }

        for resource in &self.resources {
            if !resource.url.starts_with('/') {
                return Err(Error::Config(format!(
                    "resource url must start with '/': {}",
                    resource.url
                )));
            }
        }

        if let Some(ref url) = self.store_url {
            if !url.starts_with("redis://")
                && !url.starts_with("file://")
                && !url.starts_with("memory://")
            {
                return Err(Error::Config(format!("unsupported store url: {url}")));
            }
        }

        Ok(())
    }

    /// TTL of the refresh-token cookie
    #[must_use]
    pub fn refresh_duration(&self) -> Duration {
        self.idle_duration * 2
    }

    /// Path of an OAuth endpoint under the reserved prefix, e.g. `/oauth/callback`
    #[must_use]
    pub fn oauth_path(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.oauth_uri.trim_end_matches('/'))
    }

    /// Absolute redirect URI handed to the identity provider
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.redirection_url.trim_end_matches('/'),
            self.oauth_path("callback")
        )
    }
}

/// A protected resource entry in the policy table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    /// Path prefix the entry covers
    pub url: String,
    /// HTTP methods gated by this entry; empty or `ANY` covers all
    pub methods: Vec<String>,
    /// Roles the user must hold, all of them
    pub roles: Vec<String>,
    /// Bypass authentication entirely for this prefix
    pub white_listed: bool,
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            url: String::new(),
            methods: Vec::new(),
            roles: Vec::new(),
            white_listed: false,
        }
    }
}

impl Resource {
    /// Roles joined for log output
    #[must_use]
    pub fn roles_list(&self) -> String {
        self.roles.join(",")
    }
}

/// CORS settings for the OAuth sub-tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins
    pub origins: Vec<String>,
    /// Allowed methods
    pub methods: Vec<String>,
    /// Allowed request headers
    pub headers: Vec<String>,
    /// Headers exposed to the browser
    pub exposed_headers: Vec<String>,
    /// Allow credentialed requests
    pub credentials: bool,
    /// Preflight cache duration
    #[serde(default, with = "humantime_serde::option")]
    pub max_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            upstream: "http://127.0.0.1:8080".to_string(),
            discovery_url: "http://127.0.0.1:8081/realms/commons".to_string(),
            client_id: "test".to_string(),
            client_secret: "test".to_string(),
            encryption_key: "AgXa7xRcoClDEU0ZDSH4X0XhL5Qy2Z2j".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn default_cookie_names() {
        let config = Config::default();
        assert_eq!(config.cookie_access_name, "kc-access");
        assert_eq!(config.cookie_refresh_name, "kc-state");
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_upstream() {
        let config = Config {
            upstream: String::new(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_short_encryption_key() {
        let config = Config {
            encryption_key: "too-short".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_discovery_unless_skipped() {
        let mut config = Config {
            discovery_url: String::new(),
            ..valid_config()
        };
        assert!(config.validate().is_err());

        config.skip_token_verification = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_resource_url() {
        let mut config = valid_config();
        config.resources.push(Resource {
            url: "admin".to_string(),
            ..Resource::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn redirect_uri_joins_oauth_prefix() {
        let config = Config {
            redirection_url: "https://proxy.example.com/".to_string(),
            ..valid_config()
        };
        assert_eq!(
            config.redirect_uri(),
            "https://proxy.example.com/oauth/callback"
        );
    }

    #[test]
    fn refresh_duration_is_twice_idle() {
        let config = valid_config();
        assert_eq!(config.refresh_duration(), config.idle_duration * 2);
    }
}
