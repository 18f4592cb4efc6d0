//! Session configuration: file locations, scopes and flow timing.

use crate::error::{Error, Result};
use rand::Rng;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_VAR: &str = "COURIER_CONFIG_DIR";

/// Default window for the user to complete consent.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const APP_DIR: &str = "courier";
const CREDENTIALS_FILE: &str = "credentials.json";
const TOKEN_FILE: &str = "token.json";

/// Lowest port used for random callback ports (IANA dynamic range).
const DYNAMIC_PORT_MIN: u16 = 49152;

/// Which local port the callback listener binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackPort {
    /// A random port from the dynamic range, chosen per attempt.
    #[default]
    Random,
    /// Always the given port.
    Fixed(u16),
}

impl CallbackPort {
    /// Resolves the port for one attempt.
    #[must_use]
    pub fn pick(self) -> u16 {
        match self {
            Self::Random => rand::thread_rng().gen_range(DYNAMIC_PORT_MIN..=u16::MAX),
            Self::Fixed(port) => port,
        }
    }
}

/// Configuration for an [`AuthSession`](crate::AuthSession).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Application credentials file (`installed`/`web` JSON).
    pub credentials_path: PathBuf,
    /// Persisted refresh-token file.
    pub token_path: PathBuf,
    /// Scopes to request; empty means the provider defaults.
    pub scopes: Vec<String>,
    /// How long to wait for the redirect.
    pub timeout: Duration,
    /// Callback port policy.
    pub callback_port: CallbackPort,
}

impl AuthConfig {
    /// Creates a configuration rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            credentials_path: dir.join(CREDENTIALS_FILE),
            token_path: dir.join(TOKEN_FILE),
            scopes: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            callback_port: CallbackPort::Random,
        }
    }

    /// Creates a configuration in `$COURIER_CONFIG_DIR`, falling back to
    /// the platform config directory (`~/.config/courier` on Linux).
    ///
    /// # Errors
    ///
    /// Returns an error if neither location can be determined.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = env::var_os(CONFIG_DIR_VAR).filter(|d| !d.is_empty()) {
            return Ok(Self::new(dir));
        }

        let dir = dirs::config_dir().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "cannot determine a config directory; set {CONFIG_DIR_VAR}"
            ))
        })?;
        Ok(Self::new(dir.join(APP_DIR)))
    }

    /// Sets the scopes to request.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the consent timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the callback port policy.
    #[must_use]
    pub const fn with_callback_port(mut self, port: CallbackPort) -> Self {
        self.callback_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_dir() {
        let config = AuthConfig::new("/tmp/courier-test");
        assert_eq!(
            config.credentials_path,
            PathBuf::from("/tmp/courier-test/credentials.json")
        );
        assert_eq!(config.token_path, PathBuf::from("/tmp/courier-test/token.json"));
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.callback_port, CallbackPort::Random);
    }

    #[test]
    fn test_random_port_in_dynamic_range() {
        for _ in 0..64 {
            assert!(CallbackPort::Random.pick() >= DYNAMIC_PORT_MIN);
        }
        assert_eq!(CallbackPort::Fixed(8085).pick(), 8085);
    }
}
