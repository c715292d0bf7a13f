//! Trakt OAuth token lifecycle
//!
//! Acquires, stores, refreshes and revokes the single Trakt access token a
//! client holds. The HTTP client that talks to the Trakt API plugs
//! `TraktAuthenticator` in as its 401 hook. This crate has no dependency on
//! the gateway binary and can be used on its own.
//!
//! Token flow:
//! 1. Caller builds a consent URL via `authorize::build_authorization_url()`
//! 2. User authorizes; the code comes back with the `state`
//! 3. `TraktAuthDataSource::get_access_token()` exchanges the code and stores the token
//! 4. An API call returns 401 → `TraktAuthenticator::authenticate()` refreshes once
//! 5. `refresh::spawn_refresh_task()` refreshes ahead of expiry in the background
//! 6. Sign-out calls `TraktAuthDataSource::revoke_stored_token()`

pub mod authenticator;
pub mod authorize;
pub mod client;
pub mod constants;
pub mod data_source;
pub mod error;
pub mod refresh;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

pub use authenticator::{TraktAuthenticator, apply_authorization};
pub use authorize::{build_authorization_url, generate_state};
pub use client::{ClientCredentials, HttpTraktAuthClient, TraktAuthClient};
pub use constants::*;
pub use data_source::TraktAuthDataSource;
pub use error::{Error, Result};
pub use refresh::{CycleOutcome, refresh_cycle, spawn_refresh_task};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{AccessToken, TokenResponse, unix_now};
