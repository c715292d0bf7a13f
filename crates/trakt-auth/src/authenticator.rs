//! 401 authenticator
//!
//! Invoked by the HTTP client when a Trakt API call comes back 401. It makes
//! one refresh attempt and answers with either a copy of the failed request
//! carrying the new `Authorization` header, or `None` to surface the 401.
//!
//! Each invocation performs exactly one store mutation when a token was
//! stored: a replace (via the data source) on success, a delete on failure.
//! There is no retry loop; a second 401 on the retried request is the
//! caller's to handle.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, info, warn};

use crate::data_source::TraktAuthDataSource;
use crate::error::{Error, Result};
use crate::token::AccessToken;

/// Refresh-on-401 hook shared by every outbound Trakt request.
#[derive(Clone)]
pub struct TraktAuthenticator {
    data_source: Arc<TraktAuthDataSource>,
}

impl TraktAuthenticator {
    pub fn new(data_source: Arc<TraktAuthDataSource>) -> Self {
        Self { data_source }
    }

    /// Resolve a replacement request for one that was answered with 401.
    ///
    /// Returns `None` when no token is stored (no network call is made),
    /// when the refresh fails (the stored token is deleted), or when the
    /// request body cannot be replayed.
    pub async fn authenticate(&self, request: &reqwest::Request) -> Option<reqwest::Request> {
        let store = self.data_source.store();

        let Some(current) = store.read().await else {
            debug!(url = %request.url(), "401 with no stored token, not retrying");
            return None;
        };

        match self
            .data_source
            .get_access_refresh_token(Some(&current.refresh_token))
            .await
        {
            Ok(token) => {
                metrics::counter!("trakt_token_refresh_total", "trigger" => "401", "outcome" => "refreshed")
                    .increment(1);

                let Some(mut retry) = request.try_clone() else {
                    warn!(url = %request.url(), "request body is not replayable, not retrying");
                    return None;
                };
                if let Err(e) = apply_authorization(retry.headers_mut(), &token) {
                    warn!(error = %e, "refreshed token is not a valid header value");
                    return None;
                }
                info!(url = %request.url(), "token refreshed after 401, retrying request");
                Some(retry)
            }
            Err(e) => {
                metrics::counter!("trakt_token_refresh_total", "trigger" => "401", "outcome" => "failed")
                    .increment(1);
                warn!(error = %e, "token refresh after 401 failed, clearing stored token");
                if let Err(e) = store.delete().await {
                    warn!(error = %e, "failed to delete stored token");
                }
                None
            }
        }
    }
}

/// Set `Authorization: <token_type> <access_token>` on `headers`,
/// replacing any existing value.
pub fn apply_authorization(headers: &mut HeaderMap, token: &AccessToken) -> Result<()> {
    let mut value = HeaderValue::from_str(&token.authorization_value())
        .map_err(|e| Error::CredentialParse(format!("invalid authorization value: {e}")))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(())
}
