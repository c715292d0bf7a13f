//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers, adds the Trakt API
//! headers and the stored token, and forwards to the Trakt API. The upstream
//! response is relayed verbatim, error statuses included.
//!
//! A 401 from upstream goes to `TraktAuthenticator` once. When it hands back a
//! replacement request that request is sent and its response relayed;
//! otherwise the original 401 is returned to the caller. A refresh that
//! outlasts the proxy timeout is answered with 504.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use reqwest::header::{AUTHORIZATION, HOST};
use tracing::{error, info, instrument, warn};
use trakt_auth::{TRAKT_API_VERSION, TokenStore, TraktAuthenticator, apply_authorization};

use crate::error::ProxyError;
use crate::metrics;
use crate::service::ServiceMetrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub client_id: String,
    pub store: Arc<dyn TokenStore>,
    pub authenticator: TraktAuthenticator,
    pub timeout: Duration,
    pub metrics: ServiceMetrics,
}

/// Proxy an inbound request to the Trakt API.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = state.metrics.track_in_flight();
    let start = Instant::now();
    let method = request.method().to_string();

    let response = match forward(state, request).await {
        Ok(response) => response,
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_upstream_error(e.kind());
            error!(error = %e, "proxy request failed");
            e.into_response(&request_id)
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        &method,
        start.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
) -> Result<Response, ProxyError> {
    let upstream_request = build_upstream_request(state, request).await?;

    // Body is fully buffered, so the clone always succeeds
    let replay = upstream_request.try_clone();
    let response = send(state, upstream_request).await?;

    if response.status() != StatusCode::UNAUTHORIZED {
        return relay(response).await;
    }

    let Some(replay) = replay else {
        return relay(response).await;
    };

    // The refresh counts against the same deadline as an upstream call
    let reauth = tokio::time::timeout(state.timeout, state.authenticator.authenticate(&replay))
        .await
        .map_err(|_| {
            metrics::record_reauth(false);
            ProxyError::UpstreamTimeout(state.timeout.as_secs())
        })?;

    match reauth {
        Some(retry) => {
            metrics::record_reauth(true);
            state
                .metrics
                .reauthenticated_total
                .fetch_add(1, Ordering::Relaxed);
            info!("retrying request with refreshed token");
            relay(send(state, retry).await?).await
        }
        None => {
            metrics::record_reauth(false);
            warn!("upstream returned 401 and no refreshed token is available");
            relay(response).await
        }
    }
}

/// Translate the inbound request into a request against the Trakt API.
async fn build_upstream_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
) -> Result<reqwest::Request, ProxyError> {
    let (parts, body) = request.into_parts();

    let url = match parts.uri.path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    // Host is rewritten by the client; Authorization comes from the store only
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name.as_str()) || name == HOST || name == AUTHORIZATION {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert("trakt-api-version", HeaderValue::from_static(TRAKT_API_VERSION));
    let api_key = HeaderValue::from_str(&state.client_id)
        .map_err(|e| ProxyError::Internal(format!("invalid client id header: {e}")))?;
    headers.insert("trakt-api-key", api_key);

    if let Some(token) = state.store.read().await {
        if let Err(e) = apply_authorization(&mut headers, &token) {
            warn!(error = %e, "stored token is not a valid header value, sending unauthenticated");
        }
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::InvalidBody(e.to_string()))?;

    state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .timeout(state.timeout)
        .body(body)
        .build()
        .map_err(|e| ProxyError::Internal(format!("failed to build upstream request: {e}")))
}

async fn send(state: &ProxyState, request: reqwest::Request) -> Result<reqwest::Response, ProxyError> {
    state
        .client
        .execute(request)
        .await
        .map_err(|e| classify(state, e))
}

/// Copy an upstream response into an axum response, minus hop-by-hop headers.
async fn relay(upstream: reqwest::Response) -> Result<Response, ProxyError> {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let body = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("upstream response read error: {e}")))?;

    let mut response = Response::builder().status(status);
    for (name, value) in &headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(body))
        .map_err(|e| ProxyError::Internal(format!("response build error: {e}")))
}

fn classify(state: &ProxyState, e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::UpstreamTimeout(state.timeout.as_secs())
    } else {
        ProxyError::Upstream(e.to_string())
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
