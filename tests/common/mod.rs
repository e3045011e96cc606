//! Shared harness for the end-to-end proxy tests: a fake upstream that
//! echoes what it receives, a fake identity provider with a controllable
//! token endpoint, and helpers to mint signed test tokens.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    body::Body,
    extract::{Form, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use authgate::config::{Config, Resource};
use authgate::idp::{IdpClient, ProviderMetadata};
use authgate::proxy::{AppState, create_router};
use authgate::session::{CookieCodec, RefreshTokenStore};

/// Encryption key every test proxy uses
pub const ENCRYPTION_KEY: &str = "AgXa7xRcoClDEU0ZDSH4X0XhL5Qy2Z2j";

/// Key id the fake provider publishes
pub const TEST_KID: &str = "test-key";

/// HMAC secret behind the fake provider's JWKS
pub const TEST_SECRET: &[u8] = b"authgate-integration-test-secret";

/// Issuer baked into test tokens and provider metadata
pub const TEST_ISSUER: &str = "https://idp.example.com/realms/commons";

/// Marker header the fake upstream sets on every response
pub const PROXY_ACCEPTED: &str = "proxy-accepted";

/// Seconds since the Unix epoch
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Default claims mirroring what the provider issues for a browser login
pub fn default_claims() -> Value {
    json!({
        "jti": "4ee75b8e-3ee6-4382-92d4-3390b4b4937b",
        "iss": TEST_ISSUER,
        "aud": "test",
        "sub": "1e11e539-8256-4b3b-bda8-cc0d56cddb48",
        "typ": "Bearer",
        "exp": now_secs() + 3600,
        "iat": now_secs(),
        "email": "ruser@example.com",
        "name": "Example User",
        "preferred_username": "ruser",
        "given_name": "Example",
        "resource_access": {
            "openvpn": {
                "roles": ["dev-vpn"]
            }
        }
    })
}

/// Sign claims with the fake provider's key
pub fn sign_token(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(TEST_KID.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(TEST_SECRET)).unwrap()
}

/// A signed token with the default claims, expiring in an hour
pub fn valid_token() -> String {
    sign_token(&default_claims())
}

/// A signed token that expired well beyond the verifier's leeway
pub fn expired_token() -> String {
    let mut claims = default_claims();
    claims["exp"] = json!(now_secs() - 3600);
    sign_token(&claims)
}

/// Base config used by every scenario
pub fn test_config(upstream: &str) -> Config {
    Config {
        upstream: upstream.to_string(),
        client_id: "test".to_string(),
        client_secret: "test".to_string(),
        encryption_key: ENCRYPTION_KEY.to_string(),
        resources: vec![
            Resource {
                url: "/admin/white_listed".to_string(),
                white_listed: true,
                ..Resource::default()
            },
            Resource {
                url: "/admin".to_string(),
                methods: vec!["GET".to_string()],
                roles: vec!["openvpn:dev-vpn".to_string()],
                ..Resource::default()
            },
            Resource {
                url: "/auth_all".to_string(),
                methods: vec!["ANY".to_string()],
                ..Resource::default()
            },
        ],
        ..Config::default()
    }
}

/// Assemble a router from config plus optional provider and store
pub fn proxy_router(
    config: Config,
    idp: Option<Arc<IdpClient>>,
    store: Option<Arc<dyn RefreshTokenStore>>,
) -> Router {
    let state = AppState::new(config, idp, store).expect("proxy state");
    create_router(state)
}

/// Seal a raw token the way the proxy writes its access cookie
pub fn seal(value: &str) -> String {
    CookieCodec::new(ENCRYPTION_KEY).unwrap().encode(value).unwrap()
}

/// Send one request through the router
pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

/// Send a request and parse the fake upstream's JSON echo
pub async fn send_expect_upstream(router: &Router, request: Request<Body>) -> Value {
    let response = send(router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(PROXY_ACCEPTED).map(|v| v.to_str().unwrap()),
        Some("true"),
        "request did not reach the upstream"
    );
    read_json(response).await
}

/// Collect a response body as JSON
pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Upstream-echoed header value
pub fn upstream_header<'a>(echo: &'a Value, name: &str) -> Option<&'a str> {
    echo["headers"].get(name).and_then(Value::as_str)
}

// ============================================================================
// Fake upstream
// ============================================================================

/// Start an upstream that echoes method, URI and headers as JSON
pub async fn start_upstream() -> String {
    let app = Router::new().fallback(upstream_echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn upstream_echo(request: Request<Body>) -> impl IntoResponse {
    let mut headers = serde_json::Map::new();
    for (name, value) in request.headers() {
        headers.insert(
            name.as_str().to_string(),
            Value::String(value.to_str().unwrap_or_default().to_string()),
        );
    }

    let body = json!({
        "uri": request.uri().to_string(),
        "method": request.method().as_str(),
        "headers": headers,
    });

    ([(PROXY_ACCEPTED, "true")], Json(body))
}

// ============================================================================
// Fake identity provider
// ============================================================================

/// What the fake token endpoint answers to a refresh grant
pub enum RefreshResult {
    /// A fresh token pair
    Success {
        /// New signed access token
        access_token: String,
        /// New refresh token value
        refresh_token: String,
    },
    /// The refresh token is dead (`invalid_grant`)
    InvalidGrant,
    /// A transient provider failure
    ServerError,
}

/// In-process identity provider serving a JWKS and a token endpoint
pub struct FakeIdp {
    /// Base URL of the running server
    pub base: String,
    /// Number of refresh grants received
    pub refresh_calls: Arc<AtomicUsize>,
    /// Behaviour of the next refresh grants
    pub refresh_result: Arc<Mutex<RefreshResult>>,
}

#[derive(Clone)]
struct FakeIdpState {
    refresh_calls: Arc<AtomicUsize>,
    refresh_result: Arc<Mutex<RefreshResult>>,
}

impl FakeIdp {
    /// Start the fake provider
    pub async fn start() -> Self {
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let refresh_result = Arc::new(Mutex::new(RefreshResult::InvalidGrant));

        let state = FakeIdpState {
            refresh_calls: Arc::clone(&refresh_calls),
            refresh_result: Arc::clone(&refresh_result),
        };

        let app = Router::new()
            .route("/jwks", get(jwks_handler))
            .route("/token", post(token_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base: format!("http://{addr}"),
            refresh_calls,
            refresh_result,
        }
    }

    /// Provider metadata pointing at this fake
    pub fn metadata(&self) -> ProviderMetadata {
        serde_json::from_value(json!({
            "issuer": TEST_ISSUER,
            "authorization_endpoint": format!("{}/auth", self.base),
            "token_endpoint": format!("{}/token", self.base),
            "jwks_uri": format!("{}/jwks", self.base),
        }))
        .unwrap()
    }

    /// An [`IdpClient`] wired to this fake
    pub fn client(&self) -> Arc<IdpClient> {
        Arc::new(IdpClient::from_metadata(
            reqwest::Client::new(),
            self.metadata(),
            "test".to_string(),
            "test".to_string(),
        ))
    }

    /// Program the next refresh grants
    pub fn set_refresh_result(&self, result: RefreshResult) {
        *self.refresh_result.lock() = result;
    }

    /// How many refresh grants the provider has served
    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

async fn jwks_handler() -> Json<Value> {
    Json(json!({
        "keys": [{
            "kty": "oct",
            "kid": TEST_KID,
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(TEST_SECRET),
        }]
    }))
}

async fn token_handler(
    State(state): State<FakeIdpState>,
    Form(params): Form<std::collections::HashMap<String, String>>,
) -> Response {
    match params.get("grant_type").map(String::as_str) {
        Some("refresh_token") => {
            state.refresh_calls.fetch_add(1, Ordering::SeqCst);
            match &*state.refresh_result.lock() {
                RefreshResult::Success {
                    access_token,
                    refresh_token,
                } => Json(json!({
                    "access_token": access_token,
                    "token_type": "Bearer",
                    "expires_in": 300,
                    "refresh_token": refresh_token,
                    "refresh_expires_in": 1800,
                }))
                .into_response(),
                RefreshResult::InvalidGrant => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Refresh token expired",
                    })),
                )
                    .into_response(),
                RefreshResult::ServerError => {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Some("authorization_code") => Json(json!({
            "access_token": valid_token(),
            "token_type": "Bearer",
            "expires_in": 300,
            "refresh_token": "refresh-from-code",
            "refresh_expires_in": 1800,
        }))
        .into_response(),
        Some("password") => {
            let username = params.get("username").map(String::as_str);
            let password = params.get("password").map(String::as_str);
            if username == Some("ruser") && password == Some("sekret") {
                Json(json!({
                    "access_token": valid_token(),
                    "token_type": "Bearer",
                    "expires_in": 300,
                    "refresh_token": "refresh-from-login",
                }))
                .into_response()
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "invalid_grant"})),
                )
                    .into_response()
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response(),
    }
}
