//! Token storage
//!
//! The store holds at most one `AccessToken`. `replace` discards whatever
//! was stored before; `delete` leaves the store empty.
//!
//! `FileTokenStore` persists the record as a JSON file using atomic
//! temp-file + rename writes. A tokio Mutex serializes writers from the
//! request path (401 refresh) and the background refresh task; the last
//! writer wins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::AccessToken;

/// Persistence for the single current token record.
pub trait TokenStore: Send + Sync {
    fn read(&self) -> Pin<Box<dyn Future<Output = Option<AccessToken>> + Send + '_>>;

    fn replace(&self, token: AccessToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// File-backed token store.
///
/// Reads are served from the in-memory copy; the file is only read at load.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<Option<AccessToken>>,
}

impl FileTokenStore {
    /// Load the token file at `path`.
    ///
    /// A missing file is a cold start with no token; the file is created on
    /// the first `replace`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading token file: {e}")))?;
            let token: Option<AccessToken> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), present = token.is_some(), "loaded token file");
            token
        } else {
            info!(path = %path.display(), "token file not found, starting signed out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn read(&self) -> Pin<Box<dyn Future<Output = Option<AccessToken>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn replace(&self, token: AccessToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &token).await?;
            *state = Some(token);
            debug!("replaced stored token");
            Ok(())
        })
    }

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Store(format!("removing token file: {e}"))),
            }
            *state = None;
            debug!("deleted stored token");
            Ok(())
        })
    }
}

/// In-process token store with no persistence.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<Option<AccessToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AccessToken) -> Self {
        Self {
            state: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn read(&self) -> Pin<Box<dyn Future<Output = Option<AccessToken>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn replace(&self, token: AccessToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = Some(token);
            Ok(())
        })
    }

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = None;
            Ok(())
        })
    }
}

/// Write the token file atomically.
///
/// Writes a temp file in the same directory, then renames it over the
/// target, so a crash mid-write never leaves a truncated file. On unix the
/// temp file is created with mode 0600, so the token is never readable by
/// other users.
async fn write_atomic(path: &Path, token: &AccessToken) -> Result<()> {
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| Error::CredentialParse(format!("serializing token: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("token path has no parent directory".into()))?;

    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Store(format!("creating token directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(".trakt-token.tmp.{}", std::process::id()));

    // A leftover temp file would keep its old mode through a truncating open
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Store(format!("removing stale temp token file: {e}"))),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&tmp_path)
        .await
        .map_err(|e| Error::Store(format!("creating temp token file: {e}")))?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp token file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Store(format!("syncing temp token file: {e}")))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token");
    Ok(())
}
