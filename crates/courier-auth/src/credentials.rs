//! Application (OAuth client) credential resolution.
//!
//! Environment variables win over the credentials file. The file is the
//! JSON document a provider console hands out for "installed" or "web"
//! clients.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable holding the client id.
pub const CLIENT_ID_VAR: &str = "COURIER_CLIENT_ID";
/// Environment variable holding the client secret.
pub const CLIENT_SECRET_VAR: &str = "COURIER_CLIENT_SECRET";
/// Environment variable holding the redirect base URI.
pub const REDIRECT_URI_VAR: &str = "COURIER_REDIRECT_URI";

/// Redirect base used when none is configured.
pub const DEFAULT_REDIRECT_BASE: &str = "http://localhost";

/// Immutable application identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Scheme and host the callback port and path are appended to.
    pub redirect_base_uri: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Resolves [`AppCredentials`] on every call.
#[derive(Clone)]
pub struct CredentialSource {
    path: PathBuf,
    env: Arc<EnvLookup>,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialSource {
    /// Creates a source reading the process environment and `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
        }
    }

    /// Replaces the environment lookup.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Credentials file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves the application credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] when neither the environment nor the
    /// file provides credentials, and [`Error::MalformedCredentials`] when
    /// the file cannot be used.
    pub async fn load(&self) -> Result<AppCredentials> {
        if let Some(credentials) = self.from_env() {
            debug!("Using OAuth client credentials from environment");
            return Ok(credentials);
        }

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotConfigured {
                    id_var: CLIENT_ID_VAR,
                    secret_var: CLIENT_SECRET_VAR,
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(self.malformed(format!("unreadable: {e}"))),
        };

        let file: CredentialsFile =
            serde_json::from_str(&contents).map_err(|e| self.malformed(e.to_string()))?;
        let section = file
            .installed
            .or(file.web)
            .ok_or_else(|| self.malformed("expected an \"installed\" or \"web\" object"))?;

        if section.client_id.is_empty() || section.client_secret.is_empty() {
            return Err(self.malformed("client_id and client_secret must be non-empty"));
        }

        debug!(path = %self.path.display(), "Using OAuth client credentials from file");
        Ok(AppCredentials {
            client_id: section.client_id,
            client_secret: section.client_secret,
            // Older installed-app files list the out-of-band URN first.
            redirect_base_uri: section
                .redirect_uris
                .into_iter()
                .find(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
                .unwrap_or_else(|| DEFAULT_REDIRECT_BASE.to_string()),
        })
    }

    fn from_env(&self) -> Option<AppCredentials> {
        let non_empty = |key: &str| (self.env)(key).filter(|v| !v.is_empty());

        let client_id = non_empty(CLIENT_ID_VAR)?;
        let client_secret = non_empty(CLIENT_SECRET_VAR)?;
        Some(AppCredentials {
            client_id,
            client_secret,
            redirect_base_uri: non_empty(REDIRECT_URI_VAR)
                .unwrap_or_else(|| DEFAULT_REDIRECT_BASE.to_string()),
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedCredentials {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}
