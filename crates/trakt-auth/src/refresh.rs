//! Proactive background token refresh
//!
//! Trakt access tokens are long-lived, but a refresh ahead of expiry avoids
//! paying for the refresh on the first request after it lapses. The task runs
//! independently of the request path; both write through the same store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::data_source::TraktAuthDataSource;
use crate::error::Error;
use crate::token::unix_now;

/// What one refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing stored, nothing to refresh
    NoToken,
    /// Token is outside the refresh threshold
    Fresh,
    Refreshed,
    /// Refresh token was rejected; the stored token was deleted
    Cleared,
    /// Transient failure; the token is kept and the next cycle retries
    Failed,
}

/// Shortest check interval the refresh task will run at.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn a task that refreshes the stored token once it is within
/// `threshold` of expiry, checking every `interval`.
///
/// Intervals below `MIN_REFRESH_INTERVAL` (including zero) are raised to it.
pub fn spawn_refresh_task(
    data_source: Arc<TraktAuthDataSource>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    if interval < MIN_REFRESH_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            "refresh interval too short, using {}s",
            MIN_REFRESH_INTERVAL.as_secs()
        );
    }
    let interval = interval.max(MIN_REFRESH_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the token was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&data_source, threshold).await;
        }
    })
}

/// Run one check-and-refresh cycle.
pub async fn refresh_cycle(data_source: &TraktAuthDataSource, threshold: Duration) -> CycleOutcome {
    let store = data_source.store();
    let Some(token) = store.read().await else {
        return CycleOutcome::NoToken;
    };

    if !token.expires_within(unix_now(), threshold) {
        return CycleOutcome::Fresh;
    }

    debug!(expires_at = token.expires_at(), "token expiring within threshold, refreshing");

    let outcome = match data_source
        .get_access_refresh_token(Some(&token.refresh_token))
        .await
    {
        Ok(refreshed) => {
            info!(expires_at = refreshed.expires_at(), "background token refresh succeeded");
            CycleOutcome::Refreshed
        }
        Err(Error::InvalidCredentials(msg)) => {
            warn!(error = %msg, "refresh token rejected, clearing stored token");
            if let Err(e) = store.delete().await {
                warn!(error = %e, "failed to delete stored token");
            }
            CycleOutcome::Cleared
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
            CycleOutcome::Failed
        }
    };

    let label = match outcome {
        CycleOutcome::Refreshed => "refreshed",
        CycleOutcome::Cleared => "cleared",
        _ => "failed",
    };
    metrics::counter!("trakt_token_refresh_total", "trigger" => "schedule", "outcome" => label)
        .increment(1);

    outcome
}
