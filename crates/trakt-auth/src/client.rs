//! Remote token operations against the Trakt OAuth endpoints
//!
//! Three calls, all `POST` with a JSON body:
//! 1. Authorization code exchange (`grant_type=authorization_code`)
//! 2. Token refresh (`grant_type=refresh_token`)
//! 3. Token revocation (`/oauth/revoke`)
//!
//! `TraktAuthClient` is the seam the data source depends on, so tests can
//! substitute a fake without a network.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use tracing::debug;

use crate::constants::{REVOKE_PATH, TOKEN_PATH, TRAKT_API_URL};
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Application credentials registered with Trakt.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
}

/// Remote token operations.
///
/// Uses `Pin<Box<dyn Future>>` return types so it can be held as
/// `Arc<dyn TraktAuthClient>`.
pub trait TraktAuthClient: Send + Sync {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;

    fn revoke<'a>(
        &'a self,
        token: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// `reqwest`-backed client for the Trakt token endpoints.
#[derive(Clone)]
pub struct HttpTraktAuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTraktAuthClient {
    /// Client against `base_url` (e.g. a staging host or a local mock).
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client against the production API host.
    pub fn production(http: reqwest::Client) -> Self {
        Self::new(http, TRAKT_API_URL)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_token(
        &self,
        grant: &'static str,
        body: serde_json::Value,
    ) -> Result<TokenResponse> {
        let url = format!("{}{TOKEN_PATH}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("{grant} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            // 401/403 means the code or refresh token is invalid, expired or revoked
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "{grant} rejected ({status}): {body}"
                )));
            }

            return Err(Error::TokenExchange(format!(
                "{grant} returned {status}: {body}"
            )));
        }

        debug!(grant, "token endpoint call succeeded");
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid {grant} response: {e}")))
    }
}

impl TraktAuthClient for HttpTraktAuthClient {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.post_token(
                "authorization_code",
                serde_json::json!({
                    "code": code,
                    "client_id": client_id,
                    "client_secret": client_secret,
                    "redirect_uri": redirect_uri,
                    "grant_type": "authorization_code",
                }),
            )
            .await
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.post_token(
                "refresh_token",
                serde_json::json!({
                    "refresh_token": refresh_token,
                    "client_id": client_id,
                    "client_secret": client_secret,
                    "redirect_uri": redirect_uri,
                    "grant_type": "refresh_token",
                }),
            )
            .await
        })
    }

    fn revoke<'a>(
        &'a self,
        token: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}{REVOKE_PATH}", self.base_url);
            let response = self
                .http
                .post(&url)
                .json(&serde_json::json!({
                    "token": token,
                    "client_id": client_id,
                    "client_secret": client_secret,
                }))
                .send()
                .await
                .map_err(|e| Error::Network(format!("revoke request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(Error::InvalidCredentials(format!(
                        "revoke rejected ({status}): {body}"
                    )));
                }
                return Err(Error::TokenExchange(format!(
                    "revoke returned {status}: {body}"
                )));
            }

            debug!("token revoked upstream");
            Ok(())
        })
    }
}
