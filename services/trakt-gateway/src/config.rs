//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Trakt client secret is loaded from the TRAKT_CLIENT_SECRET env var or
//! `client_secret_file`, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trakt_auth::{AUTHORIZE_URL, ClientCredentials, OOB_REDIRECT_URI, TRAKT_API_URL};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub trakt: TraktConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Trakt application registration and token storage
#[derive(Debug, Deserialize)]
pub struct TraktConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to TRAKT_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    /// Where the current token record is persisted
    pub token_path: PathBuf,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// Token admin API listener. Keep this off public interfaces.
    pub admin_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Background refresh schedule
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    /// Refresh once the token is within this many seconds of expiry
    #[serde(default = "default_refresh_threshold")]
    pub threshold_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            threshold_secs: default_refresh_threshold(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }
}

fn default_redirect_uri() -> String {
    OOB_REDIRECT_URI.to_string()
}

fn default_api_url() -> String {
    TRAKT_API_URL.to_string()
}

fn default_authorize_url() -> String {
    AUTHORIZE_URL.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_refresh_threshold() -> u64 {
    86_400
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. TRAKT_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.trakt.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        for (name, url) in [
            ("api_url", &config.trakt.api_url),
            ("authorize_url", &config.trakt.authorize_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.refresh.interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh.interval_secs must be greater than 0".into(),
            ));
        }

        // Env var takes precedence over file; a blank value counts as unset
        let env_secret = std::env::var("TRAKT_CLIENT_SECRET")
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());
        if let Some(secret) = env_secret {
            config.trakt.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.trakt.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.trakt.client_secret = Some(Secret::new(secret));
            }
        }

        if config.trakt.client_secret.is_none() {
            return Err(common::Error::MissingSecret(
                "set TRAKT_CLIENT_SECRET or trakt.client_secret_file",
            ));
        }

        Ok(config)
    }

    /// Application credentials for the token endpoints.
    pub fn credentials(&self) -> common::Result<ClientCredentials> {
        let client_secret = self
            .trakt
            .client_secret
            .clone()
            .ok_or(common::Error::MissingSecret("trakt client secret"))?;
        Ok(ClientCredentials {
            client_id: self.trakt.client_id.clone(),
            client_secret,
            redirect_uri: self.trakt.redirect_uri.clone(),
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("trakt-gateway.toml")
    }
}
