//! Mock Trakt host shared by the gateway tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tokio::net::TcpListener;
use trakt_auth::{
    AccessToken, ClientCredentials, HttpTraktAuthClient, MemoryTokenStore, TraktAuthDataSource,
};

/// Access token the mock API accepts.
pub const VALID_ACCESS_TOKEN: &str = "at_fresh";

#[derive(Clone, Default)]
struct MockState {
    token_calls: Arc<AtomicU64>,
    revoke_calls: Arc<AtomicU64>,
    api_calls: Arc<AtomicU64>,
    reject_grants: Arc<AtomicBool>,
    stall_grants: Arc<AtomicBool>,
}

/// A local server playing both the OAuth endpoints and the API.
///
/// The API answers 401 unless the request carries `Bearer at_fresh`, and
/// echoes the request back as JSON otherwise.
pub struct MockTrakt {
    pub url: String,
    state: MockState,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockTrakt {
    pub async fn start() -> Self {
        let state = MockState::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let app = axum::Router::new()
            .route("/oauth/token", post(token_endpoint))
            .route("/oauth/revoke", post(revoke_endpoint))
            .fallback(api_endpoint)
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            state,
            _handle: handle,
        }
    }

    /// Make the token endpoint answer 401 to every grant.
    pub fn reject_grants(&self) {
        self.state.reject_grants.store(true, Ordering::SeqCst);
    }

    /// Make the token endpoint hang far longer than any test timeout.
    pub fn stall_grants(&self) {
        self.state.stall_grants.store(true, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> u64 {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> u64 {
        self.state.revoke_calls.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> u64 {
        self.state.api_calls.load(Ordering::SeqCst)
    }

    /// Data source wired to this server and the given store.
    pub fn data_source(&self, store: Arc<MemoryTokenStore>) -> Arc<TraktAuthDataSource> {
        let client = HttpTraktAuthClient::new(reqwest::Client::new(), &self.url);
        Arc::new(TraktAuthDataSource::new(
            Arc::new(client),
            store,
            credentials(),
        ))
    }
}

pub fn credentials() -> ClientCredentials {
    ClientCredentials {
        client_id: "test-client-id".into(),
        client_secret: String::from("test-client-secret").into(),
        redirect_uri: trakt_auth::OOB_REDIRECT_URI.into(),
    }
}

/// A token the mock API no longer accepts but whose refresh token works.
pub fn stale_token() -> AccessToken {
    AccessToken {
        access_token: "at_stale".into(),
        refresh_token: "rt_stale".into(),
        token_type: "Bearer".into(),
        scope: "public".into(),
        created_at: 1_600_000_000,
        expires_in: 7_776_000,
    }
}

async fn token_endpoint(
    State(state): State<MockState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    if state.stall_grants.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    }
    if state.reject_grants.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid_grant"})),
        )
            .into_response();
    }
    assert_eq!(body["client_id"], "test-client-id");
    assert_eq!(body["client_secret"], "test-client-secret");

    Json(serde_json::json!({
        "access_token": VALID_ACCESS_TOKEN,
        "refresh_token": "rt_fresh",
        "token_type": "Bearer",
        "expires_in": 7_776_000,
        "scope": "public",
        "created_at": trakt_auth::unix_now(),
    }))
    .into_response()
}

async fn revoke_endpoint(State(state): State<MockState>) -> StatusCode {
    state.revoke_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn api_endpoint(State(state): State<MockState>, request: Request<Body>) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Bearer {VALID_ACCESS_TOKEN}");
    let authorized = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid_token"})),
        )
            .into_response();
    }

    let mut headers_map = serde_json::Map::new();
    for (name, value) in request.headers() {
        headers_map.insert(
            name.to_string(),
            serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
        );
    }
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let body = axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();

    Json(serde_json::json!({
        "echoed_headers": headers_map,
        "method": method,
        "path": path,
        "query": query,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}
