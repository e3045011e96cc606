//! Upstream forwarder: the terminal stage of the pipeline.
//!
//! Registered as the router fallback, so every request that no OAuth route
//! claims and no earlier stage terminated ends up here and is relayed to the
//! configured upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::proxy::headers::{inject_identity_headers, strip_identity_headers};
use crate::proxy::identity::Identity;

use super::router::AppState;

/// Largest request body the proxy will buffer for forwarding (16 MiB)
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Headers that must not travel across a proxy hop
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Forward the request to the upstream service
pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();

    let path_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let url = format!(
        "{}{path_query}",
        state.config.upstream.trim_end_matches('/')
    );

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to read request body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut headers = parts.headers.clone();
    scrub_request_headers(&mut headers);

    // forwarding headers
    if let Some(host) = parts.headers.get(header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
    headers.insert(
        "x-forwarded-agent",
        HeaderValue::from_static(concat!("authgate/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
            headers.append("x-forwarded-for", value);
        }
    }

    // operator-configured static headers
    for (name, value) in &state.config.headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    // identity headers, only when the pipeline attached an identity
    if let Some(Identity(user)) = parts.extensions.get::<Identity>() {
        inject_identity_headers(&mut headers, user, &state.claim_headers);
    }

    debug!(method = %parts.method, url = %url, "Forwarding request upstream");

    let upstream = state
        .upstream_client
        .request(parts.method, &url)
        .headers(headers)
        .body(body_bytes)
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let status = resp.status();
            let mut response_headers = resp.headers().clone();
            for name in HOP_BY_HOP {
                response_headers.remove(*name);
            }

            let mut response = Response::new(Body::from_stream(resp.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = response_headers;
            response
        }
        Err(e) => {
            error!(error = %e, url = %url, "Upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Drop hop-by-hop headers, stale identity headers and fields the transport
/// re-derives
fn scrub_request_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    strip_identity_headers(headers);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_removes_hop_by_hop_and_identity() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-auth-roles", HeaderValue::from_static("forged"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));

        scrub_request_headers(&mut headers);

        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("transfer-encoding"));
        assert!(!headers.contains_key("x-auth-roles"));
        assert!(!headers.contains_key(header::HOST));
        assert_eq!(headers["accept"], "*/*");
    }
}
