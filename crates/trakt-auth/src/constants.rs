//! Trakt OAuth endpoints and protocol constants
//!
//! Client ID and secret are per-application values supplied through
//! configuration; only the public endpoint layout lives here.

/// Base URL of the Trakt REST API (token, revoke and all data endpoints)
pub const TRAKT_API_URL: &str = "https://api.trakt.tv";

/// User-facing consent page. Lives on the website host, not the API host.
pub const AUTHORIZE_URL: &str = "https://trakt.tv/oauth/authorize";

/// Token endpoint path for code exchange and refresh
pub const TOKEN_PATH: &str = "/oauth/token";

/// Revocation endpoint path
pub const REVOKE_PATH: &str = "/oauth/revoke";

/// Out-of-band redirect URI for clients without a callback listener.
/// Trakt shows the code on its own page for the user to paste back.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Value for the `trakt-api-version` header on every API request
pub const TRAKT_API_VERSION: &str = "2";

/// Token type assumed when the token endpoint omits `token_type`
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
