//! Error types for authentication operations.

use std::io;
use std::path::PathBuf;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// Callers branch on this instead of matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Application credentials are missing or malformed.
    Configuration,
    /// The callback listener could not bind its port.
    PortConflict,
    /// The provider redirected back with an error, or without a code.
    OAuthProtocol,
    /// The interactive window elapsed without a callback.
    Timeout,
    /// Exchanging the authorization code for tokens failed.
    TokenExchange,
    /// The callback request could not be processed.
    Callback,
    /// A stored refresh token was rejected by the provider.
    InvalidatedToken,
    /// Reading or writing the token file failed.
    Storage,
}

/// Authentication error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No application credentials in the environment or on disk.
    #[error(
        "OAuth client is not configured: set {id_var} and {secret_var}, \
         or place a credentials file at {}",
        path.display()
    )]
    NotConfigured {
        /// Environment variable holding the client id.
        id_var: &'static str,
        /// Environment variable holding the client secret.
        secret_var: &'static str,
        /// Expected location of the credentials file.
        path: PathBuf,
    },

    /// Credentials file exists but does not hold usable credentials.
    #[error("Malformed credentials file {}: {reason}", path.display())]
    MalformedCredentials {
        /// Credentials file path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Callback listener could not bind.
    #[error("Callback port {port} is unavailable: {source}")]
    PortConflict {
        /// Port the listener tried to bind.
        port: u16,
        /// Underlying bind failure.
        #[source]
        source: io::Error,
    },

    /// `OAuth2` error reported on the redirect.
    #[error("OAuth2 error: {error} - {description}")]
    OAuthProtocol {
        /// Error code (e.g., `access_denied`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Authorization timeout.
    #[error("Authorization timed out after {0} seconds")]
    Timeout(u64),

    /// Code-for-token exchange failed.
    #[error("Token exchange failed: {0}")]
    TokenExchange(#[source] EndpointError),

    /// The callback handler failed before it could finish the request.
    #[error("Callback handler failed: {0}")]
    Callback(String),

    /// Stored refresh token no longer works.
    #[error("Refresh token rejected: {0}")]
    InvalidatedToken(#[source] EndpointError),

    /// Token file I/O failure.
    #[error("Failed to {operation} {}: {source}", path.display())]
    Storage {
        /// Operation that failed (e.g., "read").
        operation: &'static str,
        /// Token file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Token file is not valid JSON.
    #[error("Corrupt token file {}: {source}", path.display())]
    CorruptTokenFile {
        /// Token file path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Attempted to persist a record without a refresh token.
    #[error("Refusing to store a token record without a refresh token")]
    MissingRefreshToken,
}

impl Error {
    /// Creates an `OAuth2` protocol error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuthProtocol {
            error: error.into(),
            description: description.into(),
        }
    }

    pub(crate) fn storage(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured { .. }
            | Self::MalformedCredentials { .. }
            | Self::InvalidConfig(_)
            | Self::Url(_) => ErrorKind::Configuration,
            Self::PortConflict { .. } => ErrorKind::PortConflict,
            Self::OAuthProtocol { .. } => ErrorKind::OAuthProtocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::TokenExchange(_) => ErrorKind::TokenExchange,
            Self::Callback(_) => ErrorKind::Callback,
            Self::InvalidatedToken(_) => ErrorKind::InvalidatedToken,
            Self::Storage { .. } | Self::CorruptTokenFile { .. } | Self::MissingRefreshToken => {
                ErrorKind::Storage
            }
        }
    }
}

/// Failure talking to the provider's token or revocation endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error response from the provider.
    #[error("{error} - {description}")]
    Provider {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Response body could not be understood.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}
