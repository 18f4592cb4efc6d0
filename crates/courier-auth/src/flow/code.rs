//! Interactive Authorization Code Flow over a loopback redirect.

use super::OAuthClient;
use super::callback::{CALLBACK_PATH, CallbackContext, CallbackServer};
use crate::agent::UserAgent;
use crate::config::{CallbackPort, DEFAULT_TIMEOUT};
use crate::error::{Error, ErrorKind, Result};
use crate::token::SessionCredential;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Where an attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Not started.
    Idle,
    /// Listener bound, waiting for the redirect.
    Listening {
        /// Bound callback port.
        port: u16,
    },
    /// A credential was obtained.
    Succeeded,
    /// The attempt ended with an error of this kind.
    Failed(ErrorKind),
}

/// Authorization Code Flow for `OAuth2`.
///
/// One [`run`](Self::run) is one attempt: bind, show the URL, wait for the
/// redirect or the deadline, exchange the code. The listener never outlives
/// the attempt.
pub struct AuthorizationFlow {
    client: OAuthClient,
    redirect_base: Url,
    scopes: Vec<String>,
    timeout: Duration,
    port: CallbackPort,
    agent: Arc<dyn UserAgent>,
    state: FlowState,
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow")
            .field("client", &self.client)
            .field("redirect_base", &self.redirect_base)
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .field("port", &self.port)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AuthorizationFlow {
    /// Creates a new authorization code flow.
    ///
    /// # Errors
    ///
    /// Returns an error if `redirect_base` or the provider endpoints are not
    /// absolute http(s) URLs.
    pub fn new(
        client: OAuthClient,
        redirect_base: &str,
        agent: Arc<dyn UserAgent>,
    ) -> Result<Self> {
        client.provider.validate()?;
        let redirect_base = Url::parse(redirect_base)?;
        if redirect_base.cannot_be_a_base() || !matches!(redirect_base.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "redirect base must be an http(s) URL, got {redirect_base}"
            )));
        }

        let scopes = client.provider.default_scopes.clone();
        Ok(Self {
            client,
            redirect_base,
            scopes,
            timeout: DEFAULT_TIMEOUT,
            port: CallbackPort::Random,
            agent,
            state: FlowState::Idle,
        })
    }

    /// Overrides the provider's default scopes (ignored when empty).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    /// Sets how long to wait for the redirect.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the callback port policy.
    #[must_use]
    pub const fn with_port(mut self, port: CallbackPort) -> Self {
        self.port = port;
        self
    }

    /// Current state of the attempt.
    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.state
    }

    /// Redirect URI for a listener on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be set on the redirect base.
    pub fn redirect_uri(&self, port: u16) -> Result<String> {
        let mut uri = self.redirect_base.clone();
        uri.set_port(Some(port))
            .map_err(|()| Error::InvalidConfig(format!("cannot set port on {uri}")))?;
        uri.set_path(CALLBACK_PATH);
        uri.set_query(None);
        Ok(uri.into())
    }

    /// Builds the authorization URL for user consent.
    ///
    /// Always requests offline access so the provider issues a refresh
    /// token, and forces the consent prompt so it issues one again on
    /// re-authorization.
    #[must_use]
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.client.provider.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        url
    }

    /// Runs one interactive attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::PortConflict`] if the listener cannot bind (no URL is shown)
    /// - [`Error::OAuthProtocol`] if the redirect carries an error or no code
    /// - [`Error::Timeout`] if no redirect arrives in time
    /// - [`Error::TokenExchange`] if the code cannot be exchanged
    /// - [`Error::Callback`] if the callback request cannot be processed
    pub async fn run(&mut self) -> Result<SessionCredential> {
        let outcome = self.attempt().await;
        self.state = match &outcome {
            Ok(_) => FlowState::Succeeded,
            Err(e) => FlowState::Failed(e.kind()),
        };
        outcome
    }

    async fn attempt(&mut self) -> Result<SessionCredential> {
        let server = CallbackServer::bind(self.port.pick()).await?;
        let port = server.port();
        self.state = FlowState::Listening { port };

        let redirect_uri = self.redirect_uri(port)?;
        let state = random_state();
        let url = self.authorization_url(&redirect_uri, &state);

        info!(port, "Waiting for authorization in the browser");
        self.agent.show_authorization_url(&url);
        if let Err(e) = self.agent.open_browser(&url) {
            warn!(error = %e, "Could not launch a browser; open the URL manually");
        }

        let context = CallbackContext {
            client: self.client.clone(),
            redirect_uri,
            state,
        };
        // Returning drops the listener; the deadline only runs until a
        // callback request arrives.
        server.serve(context, self.timeout).await
    }
}

/// Opaque `state` value tying the redirect to this attempt.
fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
