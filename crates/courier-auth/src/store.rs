//! Durable storage for the refresh-token record.
//!
//! A missing file means "not logged in yet" and is never an error. There is
//! no locking: one process is expected to write the file at a time.

use crate::error::{Error, Result};
use crate::token::TokenRecord;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// JSON file holding a single [`TokenRecord`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Token file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<TokenRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token");
                return Ok(None);
            }
            Err(e) => return Err(Error::storage("read", &self.path, e)),
        };

        let record = serde_json::from_str(&contents).map_err(|source| Error::CorruptTokenFile {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Replaces the stored record.
    ///
    /// The record is written to a sibling file and renamed into place, so a
    /// reader never sees a partial document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRefreshToken`] for a record without a refresh
    /// token, or a storage error if writing fails.
    pub async fn save(&self, record: &TokenRecord) -> Result<()> {
        if record.refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage("create directory for", &self.path, e))?;
        }

        let contents = serde_json::to_vec_pretty(record).map_err(|e| {
            Error::storage("serialize", &self.path, io::Error::other(e))
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        write_private(&tmp_path, &contents)
            .await
            .map_err(|e| Error::storage("write", &tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::storage("replace", &self.path, e))?;

        debug!(path = %self.path.display(), "Stored refresh token");
        Ok(())
    }

    /// Removes the stored record. Absent files are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted stored token");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage("delete", &self.path, e)),
        }
    }
}

/// Writes `contents` to `path`, readable by the owner only on Unix.
async fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
