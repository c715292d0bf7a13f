//! Admin API for the Trakt authorization
//!
//! Runs on a separate listener port (default 9090) and drives the consent
//! flow for the single account the gateway acts as. Never returns token
//! values.
//!
//! Endpoints:
//! - GET  /auth/authorize: new `state`, return the consent URL
//! - POST /auth/token: exchange `{code, state}` and store the token
//! - POST /auth/revoke: revoke the stored token and clear it locally
//! - GET  /auth/status: whether a token is stored, its scope and expiry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use trakt_auth::{TraktAuthDataSource, build_authorization_url, generate_state, unix_now};

/// How long a `state` handed out by /auth/authorize stays redeemable.
const STATE_EXPIRY: Duration = Duration::from_secs(600);

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    data_source: Arc<TraktAuthDataSource>,
    authorize_url: String,
    pending_states: Arc<Mutex<HashMap<String, Instant>>>,
}

impl AdminState {
    pub fn new(data_source: Arc<TraktAuthDataSource>, authorize_url: String) -> Self {
        Self {
            data_source,
            authorize_url,
            pending_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/auth/authorize", get(authorize))
        .route("/auth/token", post(exchange_token))
        .route("/auth/revoke", post(revoke))
        .route("/auth/status", get(status))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a token lifecycle error to the status the admin caller sees.
fn error_status(e: &trakt_auth::Error) -> StatusCode {
    match e {
        trakt_auth::Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        trakt_auth::Error::AuthExpired => StatusCode::NOT_FOUND,
        trakt_auth::Error::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
        trakt_auth::Error::Store(_) | trakt_auth::Error::CredentialParse(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// GET /auth/authorize
async fn authorize(State(state): State<AdminState>) -> Response {
    let oauth_state = generate_state();
    let creds = state.data_source.credentials();
    let authorization_url = build_authorization_url(
        &state.authorize_url,
        &creds.client_id,
        &creds.redirect_uri,
        &oauth_state,
    );

    let mut pending = state.pending_states.lock().await;
    // Lazy cleanup while holding the lock
    pending.retain(|_, created| created.elapsed() < STATE_EXPIRY);
    pending.insert(oauth_state.clone(), Instant::now());
    drop(pending);

    info!("authorization flow initiated");

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authorization_url": authorization_url,
            "state": oauth_state,
            "expires_in": STATE_EXPIRY.as_secs(),
            "instructions": "Open the URL in a browser, authorize, then POST the code and state to /auth/token"
        }),
    )
}

#[derive(Deserialize)]
struct TokenRequest {
    code: String,
    state: String,
}

/// POST /auth/token
async fn exchange_token(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<TokenRequest>,
) -> Response {
    let created = state.pending_states.lock().await.remove(&body.state);

    match created {
        None => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "unknown state (expired or not initiated via /auth/authorize)"
                }),
            );
        }
        Some(created) if created.elapsed() > STATE_EXPIRY => {
            return json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "state expired (>10 minutes), restart with /auth/authorize"
                }),
            );
        }
        Some(_) => {}
    }

    match state.data_source.get_access_token(body.code.trim()).await {
        Ok(token) => {
            info!(scope = %token.scope, "trakt account authorized");
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "status": "authorized",
                    "scope": token.scope,
                    "expires_at": token.expires_at(),
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "authorization code exchange failed");
            json_response(
                error_status(&e),
                serde_json::json!({ "error": format!("token exchange failed: {e}") }),
            )
        }
    }
}

/// POST /auth/revoke
///
/// The local token is cleared even if Trakt rejects the revocation.
async fn revoke(State(state): State<AdminState>) -> Response {
    match state.data_source.revoke_stored_token().await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "status": "revoked" }),
        ),
        Err(trakt_auth::Error::AuthExpired) => json_response(
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "no token stored" }),
        ),
        Err(e) => {
            warn!(error = %e, "revocation failed");
            json_response(
                error_status(&e),
                serde_json::json!({
                    "error": format!("revocation failed: {e}"),
                    "local_token_cleared": true,
                }),
            )
        }
    }
}

/// GET /auth/status
async fn status(State(state): State<AdminState>) -> Response {
    let body = match state.data_source.store().read().await {
        Some(token) => {
            let expires_at = token.expires_at();
            serde_json::json!({
                "authorized": true,
                "scope": token.scope,
                "token_type": token.token_type,
                "expires_at": expires_at,
                "expires_in": expires_at.saturating_sub(unix_now()),
            })
        }
        None => serde_json::json!({ "authorized": false }),
    };
    json_response(StatusCode::OK, body)
}
