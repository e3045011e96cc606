//! Error types for authgate

use std::io;

use thiserror::Error;

/// Result type alias for authgate
pub type Result<T> = std::result::Result<T, Error>;

/// Authgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No credential found in the request
    #[error("No session found in request")]
    NoSession,

    /// The token carries no audience claim
    #[error("Token has no audience claim")]
    NoTokenAudience,

    /// The access token has expired
    #[error("Access token has expired")]
    TokenExpired,

    /// Signature, issuer or claim validation failed
    #[error("Token verification failed: {0}")]
    TokenInvalid(String),

    /// The refresh token itself has expired
    #[error("Refresh token has expired")]
    RefreshExpired,

    /// Transient failure while refreshing the access token
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Refresh token store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Identity provider error
    #[error("Identity provider error: {0}")]
    Idp(String),

    /// Cookie encryption or decryption failure
    #[error("Cookie cipher failure")]
    Crypto,

    /// Upstream forwarding error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
