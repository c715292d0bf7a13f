//! Trakt API gateway
//!
//! Single-binary Rust service that:
//! 1. Holds the Trakt OAuth token for one account on disk
//! 2. Listens for incoming requests and adds the Trakt API headers
//! 3. Proxies to api.trakt.tv, refreshing the token once on a 401
//! 4. Refreshes the token in the background ahead of expiry
//! 5. Serves the consent flow on a separate admin port

mod admin;
mod config;
mod error;
mod metrics;
mod proxy;
mod service;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trakt_auth::{
    FileTokenStore, HttpTraktAuthClient, TokenStore, TraktAuthDataSource, TraktAuthenticator,
    unix_now,
};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::proxy::ProxyState;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    prometheus: PrometheusHandle,
}

/// Build the proxy router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by LOG_LEVEL or RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting trakt-gateway");

    // Install before anything records
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        admin_addr = %config.proxy.admin_addr,
        api_url = %config.trakt.api_url,
        token_path = %config.trakt.token_path.display(),
        "configuration loaded"
    );

    let store = Arc::new(
        FileTokenStore::load(config.trakt.token_path.clone())
            .await
            .context("failed to load token store")?,
    );
    match store.read().await {
        Some(token) => info!(
            scope = %token.scope,
            expires_at = token.expires_at(),
            expired = token.expires_at() <= unix_now(),
            "loaded stored token"
        ),
        None => warn!(
            admin_addr = %config.proxy.admin_addr,
            "no stored token, authorize via /auth/authorize on the admin port"
        ),
    }

    let http_client = reqwest::Client::new();
    let auth_http = reqwest::Client::builder()
        .timeout(config.proxy.timeout())
        .build()
        .context("failed to build token endpoint HTTP client")?;
    let auth_client = HttpTraktAuthClient::new(auth_http, config.trakt.api_url.clone());
    let data_source = Arc::new(TraktAuthDataSource::new(
        Arc::new(auth_client),
        store.clone(),
        config.credentials()?,
    ));
    let authenticator = TraktAuthenticator::new(data_source.clone());

    let refresh_handle = trakt_auth::spawn_refresh_task(
        data_source.clone(),
        config.refresh.interval(),
        config.refresh.threshold(),
    );

    let service_metrics = ServiceMetrics::new();
    let app_state = AppState {
        proxy: ProxyState {
            client: http_client,
            upstream_url: config.trakt.api_url.clone(),
            client_id: config.trakt.client_id.clone(),
            store,
            authenticator,
            timeout: config.proxy.timeout(),
            metrics: service_metrics.clone(),
        },
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);
    let admin_app = build_admin_router(AdminState::new(
        data_source,
        config.trakt.authorize_url.clone(),
    ));

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    let admin_addr = config.proxy.admin_addr;
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;

    info!(addr = %listen_addr, admin_addr = %admin_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires: both servers
    // are told to drain, then raced against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut proxy_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = proxy_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut admin_rx = shutdown_rx;
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async move {
                let _ = admin_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;

    refresh_handle.abort();
    let _ = shutdown_tx.send(true);

    let drained = async {
        let (proxy, admin) = tokio::join!(server_handle, admin_handle);
        for (name, result) in [("proxy", proxy), ("admin", admin)] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(server = name, error = %e, "server error during shutdown"),
                Err(e) => error!(server = name, error = %e, "server task panicked"),
            }
        }
    };

    match tokio::time::timeout(DRAIN_TIMEOUT, drained).await {
        Ok(()) => info!("all in-flight requests drained"),
        Err(_) => {
            let remaining = service_metrics.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: token presence, uptime and request counters.
///
/// Always 200; a missing token is reported, not treated as unhealthy, since
/// the admin API is how it gets fixed.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.proxy.metrics;
    let token = state.proxy.store.read().await;

    let token_status = match &token {
        Some(t) if t.expires_at() <= unix_now() => "expired",
        Some(_) => "present",
        None => "missing",
    };

    let body = serde_json::json!({
        "status": "healthy",
        "token": token_status,
        "token_expires_at": token.as_ref().map(|t| t.expires_at()),
        "uptime_seconds": metrics.started_at.elapsed().as_secs(),
        "requests_served": metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": metrics.errors_total.load(Ordering::Relaxed),
        "reauthenticated_total": metrics.reauthenticated_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies everything else to the Trakt API.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTrakt, VALID_ACCESS_TOKEN, stale_token};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;
    use trakt_auth::{AccessToken, MemoryTokenStore};

    /// A handle that renders without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn fresh_token() -> AccessToken {
        AccessToken {
            access_token: VALID_ACCESS_TOKEN.into(),
            refresh_token: "rt_fresh".into(),
            created_at: unix_now(),
            ..stale_token()
        }
    }

    fn test_app_state(upstream_url: &str, mock: &MockTrakt, store: Arc<MemoryTokenStore>) -> AppState {
        let data_source = mock.data_source(store.clone());
        AppState {
            proxy: ProxyState {
                client: reqwest::Client::new(),
                upstream_url: upstream_url.to_string(),
                client_id: "test-client-id".into(),
                store,
                authenticator: TraktAuthenticator::new(data_source),
                timeout: Duration::from_secs(5),
                metrics: ServiceMetrics::new(),
            },
            prometheus: test_prometheus_handle(),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_token_and_counters() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(fresh_token()));
        let state = test_app_state(&mock.url, &mock, store);
        state.proxy.metrics.requests_total.fetch_add(5, Ordering::Relaxed);

        let response = build_router(state, 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["token"], "present");
        assert_eq!(json["requests_served"], 5);
        assert!(json["uptime_seconds"].is_u64());
        assert!(!json.to_string().contains(VALID_ACCESS_TOKEN));
    }

    #[tokio::test]
    async fn health_endpoint_reports_missing_and_expired_tokens() {
        let mock = MockTrakt::start().await;

        let empty = test_app_state(&mock.url, &mock, Arc::new(MemoryTokenStore::new()));
        let response = build_router(empty, 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["token"], "missing");

        let expired = test_app_state(
            &mock.url,
            &mock,
            Arc::new(MemoryTokenStore::with_token(stale_token())),
        );
        let response = build_router(expired, 1000)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["token"], "expired");
    }

    #[tokio::test]
    async fn proxy_adds_trakt_headers_and_stored_token() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(fresh_token()));
        let app = build_router(test_app_state(&mock.url, &mock, store), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sync/history?limit=10")
                    .method("POST")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer client-supplied")
                    .header("trakt-api-version", "1")
                    .header("connection", "keep-alive")
                    .header("x-custom", "preserved")
                    .body(Body::from(r#"{"movies":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        let headers = &json["echoed_headers"];
        assert_eq!(headers["authorization"], "Bearer at_fresh");
        assert_eq!(headers["trakt-api-version"], "2");
        assert_eq!(headers["trakt-api-key"], "test-client-id");
        assert_eq!(headers["x-custom"], "preserved");
        assert!(headers.get("connection").is_none());
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/sync/history");
        assert_eq!(json["query"], "limit=10");
        assert_eq!(json["body"], r#"{"movies":[]}"#);
        assert_eq!(mock.token_calls(), 0);
    }

    #[tokio::test]
    async fn proxy_refreshes_and_retries_once_on_401() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(stale_token()));
        let app = build_router(test_app_state(&mock.url, &mock, store.clone()), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sync/history")
                    .method("POST")
                    .body(Body::from(r#"{"episodes":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["echoed_headers"]["authorization"], "Bearer at_fresh");
        assert_eq!(json["body"], r#"{"episodes":[]}"#, "body must be replayed");

        assert_eq!(mock.token_calls(), 1);
        assert_eq!(mock.api_calls(), 2);
        let stored = store.read().await.unwrap();
        assert_eq!(stored.access_token, "at_fresh");
        assert_eq!(stored.refresh_token, "rt_fresh");
    }

    #[tokio::test]
    async fn proxy_returns_401_and_clears_token_when_refresh_fails() {
        let mock = MockTrakt::start().await;
        mock.reject_grants();
        let store = Arc::new(MemoryTokenStore::with_token(stale_token()));
        let app = build_router(test_app_state(&mock.url, &mock, store.clone()), 1000);

        let response = app
            .oneshot(Request::builder().uri("/users/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = json_body(response).await;
        assert_eq!(json["error"], "invalid_token", "original 401 body is relayed");
        assert_eq!(mock.token_calls(), 1);
        assert_eq!(mock.api_calls(), 1);
        assert!(store.read().await.is_none());
    }

    #[tokio::test]
    async fn proxy_returns_401_without_refresh_when_no_token() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        let app = build_router(test_app_state(&mock.url, &mock, store), 1000);

        let response = app
            .oneshot(Request::builder().uri("/users/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(mock.token_calls(), 0);
        assert_eq!(mock.api_calls(), 1);
    }

    #[tokio::test]
    async fn proxy_returns_502_for_dead_upstream() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(fresh_token()));
        let state = test_app_state("http://127.0.0.1:1", &mock, store);
        let metrics = state.proxy.metrics.clone();

        let response = build_router(state, 1000)
            .oneshot(Request::builder().uri("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = json_body(response).await;
        assert_eq!(json["error"]["type"], "gateway_error");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(metrics.errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn proxy_timeout_returns_504() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let slow_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "too late"
            });
            axum::serve(listener, app).await.unwrap();
        });

        let mock = MockTrakt::start().await;
        let mut state = test_app_state(&slow_url, &mock, Arc::new(MemoryTokenStore::new()));
        state.proxy.timeout = Duration::from_millis(200);

        let response = build_router(state, 1000)
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = json_body(response).await;
        assert_eq!(json["error"]["type"], "gateway_error");
    }

    #[tokio::test]
    async fn stalled_refresh_after_401_returns_504() {
        let mock = MockTrakt::start().await;
        mock.stall_grants();
        let store = Arc::new(MemoryTokenStore::with_token(stale_token()));
        let mut state = test_app_state(&mock.url, &mock, store);
        state.proxy.timeout = Duration::from_millis(200);
        let metrics = state.proxy.metrics.clone();

        let response = tokio::time::timeout(
            Duration::from_secs(3),
            build_router(state, 1000).oneshot(
                Request::builder()
                    .uri("/users/settings")
                    .body(Body::empty())
                    .unwrap(),
            ),
        )
        .await
        .expect("request must finish within the proxy timeout")
        .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = json_body(response).await;
        assert_eq!(json["error"]["type"], "gateway_error");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(mock.token_calls(), 1);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let mock = MockTrakt::start().await;
        let state = test_app_state(&mock.url, &mock, Arc::new(MemoryTokenStore::new()));

        let response = build_router(state, 1000)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn reauthentication_is_counted() {
        let mock = MockTrakt::start().await;
        let store = Arc::new(MemoryTokenStore::with_token(stale_token()));
        let state = test_app_state(&mock.url, &mock, store);
        let metrics = state.proxy.metrics.clone();

        let response = build_router(state, 1000)
            .oneshot(Request::builder().uri("/calendars/my/shows").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.reauthenticated_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.errors_total.load(Ordering::Relaxed), 0);
    }
}
