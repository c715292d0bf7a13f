//! Error types for Trakt OAuth token operations

/// Errors from token acquisition, refresh, revocation and storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required input was empty. Detected locally, nothing is sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The token endpoint rejected the code or refresh token (401/403).
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("no stored access token")]
    AuthExpired,

    #[error("token store error: {0}")]
    Store(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),
}

impl Error {
    /// Whether the failure came from talking to Trakt (as opposed to
    /// local validation or persistence).
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::TokenExchange(_) | Error::InvalidCredentials(_)
        )
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
