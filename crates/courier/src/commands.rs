//! Session commands.

use anyhow::{Context, bail};
use courier_auth::{AuthSession, Error, ErrorKind};
use tracing::info;

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Authorize (or reuse a stored token).
    Login,
    /// Report whether a usable token exists.
    Status,
    /// Revoke and forget the stored token.
    Logout,
}

impl Command {
    /// Maps the first argument to a command; no argument means `status`.
    pub fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg {
            Some("login") => Ok(Self::Login),
            None | Some("status") => Ok(Self::Status),
            Some("logout") => Ok(Self::Logout),
            Some(other) => bail!("unknown command `{other}` (expected login, status or logout)"),
        }
    }

    /// Executes the command against `session`.
    pub async fn run(self, session: &AuthSession) -> anyhow::Result<()> {
        match self {
            Self::Login => {
                let signer = match session.get_client().await {
                    Ok(signer) => signer,
                    Err(e) => {
                        let hint = remediation(&e);
                        return Err(e).context(hint);
                    }
                };
                info!("Signed in");
                if let Some(expires_at) = signer.expires_at().await {
                    println!("Signed in; access token valid until {expires_at}");
                } else {
                    println!("Signed in");
                }
            }
            Self::Status => {
                if session.has_valid_token().await {
                    println!("Signed in");
                } else {
                    println!("Not signed in; run `courier login`");
                }
            }
            Self::Logout => {
                session.revoke().await?;
                println!("Signed out");
            }
        }
        Ok(())
    }
}

/// One-line advice for a failed login.
fn remediation(error: &Error) -> &'static str {
    match error.kind() {
        ErrorKind::Configuration => "configure OAuth client credentials and retry",
        ErrorKind::PortConflict => "another login may be running; retry `courier login`",
        ErrorKind::OAuthProtocol => "authorization was not granted; retry `courier login`",
        ErrorKind::Timeout => "no response from the browser in time; retry `courier login`",
        ErrorKind::TokenExchange => "the provider rejected the authorization code; retry `courier login`",
        ErrorKind::Callback => "the browser redirect could not be processed; retry `courier login`",
        ErrorKind::InvalidatedToken => "the stored token is no longer valid; retry `courier login`",
        ErrorKind::Storage => "check permissions on the courier config directory",
    }
}
