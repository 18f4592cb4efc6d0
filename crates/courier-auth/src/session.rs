//! Session orchestration: cache, stored token, interactive fallback.

use crate::agent::{SystemUserAgent, UserAgent};
use crate::config::AuthConfig;
use crate::credentials::CredentialSource;
use crate::error::Result;
use crate::flow::{AuthorizationFlow, OAuthClient};
use crate::provider::Provider;
use crate::signer::RequestSigner;
use crate::store::TokenStore;
use crate::token::{SessionCredential, TokenRecord};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Authentication session for one process.
///
/// Construct once and pass by reference to whatever needs API access. The
/// cached [`RequestSigner`] lives here, not in a global.
pub struct AuthSession {
    config: AuthConfig,
    provider: Provider,
    credentials: CredentialSource,
    store: TokenStore,
    agent: Arc<dyn UserAgent>,
    http_client: reqwest::Client,
    cached: Mutex<Option<RequestSigner>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("config", &self.config)
            .field("provider", &self.provider.name)
            .field("credentials", &self.credentials)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Creates a session using the files named in `config`.
    #[must_use]
    pub fn new(config: AuthConfig, provider: Provider) -> Self {
        Self {
            credentials: CredentialSource::new(&config.credentials_path),
            store: TokenStore::new(&config.token_path),
            config,
            provider,
            agent: Arc::new(SystemUserAgent),
            http_client: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Replaces how the authorization URL is presented.
    #[must_use]
    pub fn with_user_agent(mut self, agent: Arc<dyn UserAgent>) -> Self {
        self.agent = agent;
        self
    }

    /// Replaces the application credential source.
    #[must_use]
    pub fn with_credential_source(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    /// Token store backing this session.
    #[must_use]
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Returns an authenticated handle, authorizing interactively if needed.
    ///
    /// Order: cached handle, then the stored refresh token (validated by a
    /// refresh), then the browser flow. A stored token the provider rejects
    /// is discarded silently in favour of the browser flow.
    ///
    /// # Errors
    ///
    /// Returns configuration, storage or flow errors; a rejected stored
    /// token is never returned as an error.
    pub async fn get_client(&self) -> Result<RequestSigner> {
        let mut cached = self.cached.lock().await;
        if let Some(signer) = cached.as_ref() {
            return Ok(signer.clone());
        }

        let signer = match self.load_validated().await? {
            Some(signer) => signer,
            None => self.authorize().await?,
        };
        *cached = Some(signer.clone());
        Ok(signer)
    }

    /// Whether a usable credential exists, without prompting the user.
    ///
    /// Any failure counts as `false`.
    pub async fn has_valid_token(&self) -> bool {
        let mut cached = self.cached.lock().await;
        if cached.is_some() {
            return true;
        }

        match self.load_validated().await {
            Ok(Some(signer)) => {
                *cached = Some(signer);
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Token check failed");
                false
            }
        }
    }

    /// Signs out: revokes remotely (best effort), deletes the stored
    /// token and forgets the cached handle.
    ///
    /// # Errors
    ///
    /// Returns an error only if the token file cannot be deleted; the
    /// cached handle is dropped either way.
    pub async fn revoke(&self) -> Result<()> {
        let mut cached = self.cached.lock().await;

        let target = match cached.as_ref() {
            Some(signer) => Some((signer.client().clone(), signer.refresh_token().await)),
            None => match self.store.load().await {
                Ok(record) => record.map(|r| (self.client_for_record(&r), r.refresh_token)),
                Err(e) => {
                    warn!(error = %e, "Could not read stored token for revocation");
                    None
                }
            },
        };

        if let Some((client, refresh_token)) = target {
            match client.revoke_token(&refresh_token).await {
                Ok(()) => info!("Refresh token revoked"),
                Err(e) => warn!(error = %e, "Remote token revocation failed"),
            }
        }

        *cached = None;
        self.store.delete().await
    }

    /// Loads the stored record and proves it still works.
    async fn load_validated(&self) -> Result<Option<RequestSigner>> {
        let Some(record) = self.store.load().await? else {
            return Ok(None);
        };

        let signer = RequestSigner::new(
            self.client_for_record(&record),
            SessionCredential::from_refresh_token(&record.refresh_token),
        );
        if let Err(e) = signer.force_refresh().await {
            warn!(error = %e, "Stored refresh token was rejected; re-authorizing");
            return Ok(None);
        }

        let refresh_token = signer.refresh_token().await;
        if refresh_token != record.refresh_token {
            debug!("Provider rotated the refresh token");
            let rotated = TokenRecord {
                refresh_token,
                ..record
            };
            self.store.save(&rotated).await?;
        }

        debug!("Using stored refresh token");
        Ok(Some(signer))
    }

    async fn authorize(&self) -> Result<RequestSigner> {
        let app = self.credentials.load().await?;
        let client = OAuthClient::new(&app.client_id, self.provider.clone())
            .with_client_secret(&app.client_secret)
            .with_http_client(self.http_client.clone());

        let mut flow =
            AuthorizationFlow::new(client.clone(), &app.redirect_base_uri, Arc::clone(&self.agent))?
                .with_scopes(self.config.scopes.clone())
                .with_timeout(self.config.timeout)
                .with_port(self.config.callback_port);
        let credential = flow.run().await?;

        self.store
            .save(&TokenRecord::new(
                app.client_id,
                app.client_secret,
                &credential.refresh_token,
            ))
            .await?;
        info!(path = %self.store.path().display(), "Authorization complete; refresh token stored");

        Ok(RequestSigner::new(client, credential))
    }

    fn client_for_record(&self, record: &TokenRecord) -> OAuthClient {
        OAuthClient::new(&record.client_id, self.provider.clone())
            .with_client_secret(&record.client_secret)
            .with_http_client(self.http_client.clone())
    }
}
