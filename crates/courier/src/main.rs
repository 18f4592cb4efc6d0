//! `courier` - Gmail from the terminal
//!
//! This binary only wires logging to the authentication session; the Gmail
//! commands build on the handle `login` produces.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;

use courier_auth::{AuthConfig, AuthSession, Provider};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::Command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (stderr, so stdout stays machine-readable)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info,courier_auth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = Command::parse(std::env::args().nth(1).as_deref())?;
    let config = AuthConfig::from_env()?;
    debug!(token_path = %config.token_path.display(), "Loaded configuration");

    let session = AuthSession::new(config, Provider::google()?);
    command.run(&session).await
}
