//! Token lifecycle orchestration
//!
//! Validates inputs, calls the remote token operations, and keeps the token
//! store in step with the outcome. Every method returns a `Result`; remote
//! failures are funneled through `safe_api_call` so callers see a logged
//! error value and never a panic or a half-applied store update.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{ClientCredentials, TraktAuthClient};
use crate::error::{Error, Result};
use crate::store::TokenStore;
use crate::token::{AccessToken, unix_now};

/// Code exchange, refresh and revocation against an injected client and store.
pub struct TraktAuthDataSource {
    client: Arc<dyn TraktAuthClient>,
    store: Arc<dyn TokenStore>,
    credentials: ClientCredentials,
}

impl TraktAuthDataSource {
    pub fn new(
        client: Arc<dyn TraktAuthClient>,
        store: Arc<dyn TokenStore>,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            client,
            store,
            credentials,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Exchange an authorization code for a token and store it.
    pub async fn get_access_token(&self, code: &str) -> Result<AccessToken> {
        if code.is_empty() {
            return Err(Error::InvalidArgument("authorization code is empty".into()));
        }

        let creds = &self.credentials;
        let response = safe_api_call(
            "exchange_code",
            self.client.exchange_code(
                code,
                &creds.client_id,
                creds.client_secret.expose(),
                &creds.redirect_uri,
            ),
        )
        .await?;

        let token = response.into_access_token(unix_now());
        validate(&token)?;
        self.store.replace(token.clone()).await?;
        info!(scope = %token.scope, expires_at = token.expires_at(), "access token acquired");
        Ok(token)
    }

    /// Revoke `token` upstream, then clear the local store.
    ///
    /// The store is cleared whether or not the remote call succeeded; the
    /// remote outcome is what gets returned.
    pub async fn revoke_access_token(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(Error::InvalidArgument("token to revoke is empty".into()));
        }

        let creds = &self.credentials;
        let remote = safe_api_call(
            "revoke",
            self.client
                .revoke(token, &creds.client_id, creds.client_secret.expose()),
        )
        .await;

        let cleared = self.store.delete().await;
        if let Err(ref e) = cleared {
            warn!(error = %e, "failed to clear stored token after revoke");
        }

        remote?;
        cleared?;
        info!("access token revoked");
        Ok(())
    }

    /// Revoke whatever token is currently stored.
    ///
    /// `AuthExpired` when the store is empty; nothing is sent in that case.
    pub async fn revoke_stored_token(&self) -> Result<()> {
        let token = self.store.read().await.ok_or(Error::AuthExpired)?;
        self.revoke_access_token(&token.access_token).await
    }

    /// Trade a refresh token for a new token and store it.
    pub async fn get_access_refresh_token(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<AccessToken> {
        let refresh_token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidArgument("refresh token is missing".into()))?;

        let creds = &self.credentials;
        let response = safe_api_call(
            "refresh_token",
            self.client.refresh(
                refresh_token,
                &creds.client_id,
                creds.client_secret.expose(),
                &creds.redirect_uri,
            ),
        )
        .await?;

        let token = response.into_access_token(unix_now());
        validate(&token)?;
        self.store.replace(token.clone()).await?;
        info!(expires_at = token.expires_at(), "access token refreshed");
        Ok(token)
    }
}

/// Await a remote call, logging and counting its outcome.
async fn safe_api_call<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match call.await {
        Ok(value) => {
            metrics::counter!("trakt_auth_calls_total", "operation" => operation, "outcome" => "ok")
                .increment(1);
            Ok(value)
        }
        Err(e) => {
            metrics::counter!("trakt_auth_calls_total", "operation" => operation, "outcome" => "error")
                .increment(1);
            warn!(operation, error = %e, "trakt auth call failed");
            Err(e)
        }
    }
}

/// A 2xx with an empty token is as unusable as a failed call.
fn validate(token: &AccessToken) -> Result<()> {
    if token.access_token.is_empty() || token.refresh_token.is_empty() {
        return Err(Error::TokenExchange(
            "token endpoint returned an empty token".into(),
        ));
    }
    Ok(())
}
