//! # courier-auth
//!
//! `OAuth2` authentication for the courier Gmail tools.
//!
//! ## Features
//!
//! - **Interactive authorization**: Authorization Code Flow with a one-shot
//!   loopback listener, browser launch and a consent deadline
//! - **Durable refresh tokens**: one JSON record, owner-only permissions
//! - **Sessions**: cached handles, silent validation of stored tokens,
//!   interactive fallback, revocation
//! - **Lazy refresh**: access tokens are minted when a request needs one
//!
//! ## Quick Start
//!
//! ```ignore
//! use courier_auth::{AuthConfig, AuthSession, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = AuthSession::new(AuthConfig::from_env()?, Provider::google()?);
//!
//!     // Stored token if it still works, browser consent otherwise
//!     let signer = session.get_client().await?;
//!
//!     let request = reqwest::Client::new()
//!         .get("https://gmail.googleapis.com/gmail/v1/users/me/profile");
//!     let profile = signer.sign(request).await?.send().await?;
//!     println!("{}", profile.text().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Application credentials
//!
//! `COURIER_CLIENT_ID` and `COURIER_CLIENT_SECRET` (plus optional
//! `COURIER_REDIRECT_URI`) take priority over `credentials.json` in the
//! config directory, which may hold an `installed` or `web` client.
//!
//! ## Errors
//!
//! Every failure is an [`Error`]; [`Error::kind`] groups them into the
//! handful of cases a caller acts on differently.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod credentials;
mod error;
pub mod flow;
pub mod provider;
pub mod session;
pub mod signer;
pub mod store;
pub mod token;

pub use agent::{SystemUserAgent, UserAgent};
pub use config::{AuthConfig, CallbackPort};
pub use credentials::{AppCredentials, CredentialSource};
pub use error::{EndpointError, Error, ErrorKind, Result};
pub use flow::{AuthorizationFlow, FlowState, OAuthClient};
pub use provider::Provider;
pub use session::AuthSession;
pub use signer::RequestSigner;
pub use store::TokenStore;
pub use token::{SessionCredential, Token, TokenRecord};
