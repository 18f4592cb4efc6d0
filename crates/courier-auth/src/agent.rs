//! How an authorization URL reaches the human.

use std::io;
use url::Url;

/// Presents the authorization URL to the user.
///
/// The flow always calls [`show_authorization_url`](Self::show_authorization_url)
/// before [`open_browser`](Self::open_browser); a browser failure is only
/// ever logged, so the printed URL is the path of last resort for remote
/// and headless sessions.
pub trait UserAgent: Send + Sync {
    /// Makes the URL visible to the user.
    fn show_authorization_url(&self, url: &Url);

    /// Tries to open the URL in a local browser.
    ///
    /// # Errors
    ///
    /// Returns an error if no browser could be launched.
    fn open_browser(&self, url: &Url) -> io::Result<()>;
}

/// Prints to stderr and launches the platform browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUserAgent;

impl UserAgent for SystemUserAgent {
    fn show_authorization_url(&self, url: &Url) {
        eprintln!("Open this URL in your browser to authorize access:\n\n    {url}\n");
    }

    fn open_browser(&self, url: &Url) -> io::Result<()> {
        opener::open_browser(url.as_str()).map_err(io::Error::other)
    }
}
