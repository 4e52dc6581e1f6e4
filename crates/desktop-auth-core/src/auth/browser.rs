use url::Url;

use super::AuthError;

/// Opens the identity provider's sign-in page for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> Result<(), AuthError>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<(), AuthError> {
        tracing::debug!(host = url.host_str().unwrap_or_default(), "opening system browser");
        open::that(url.as_str()).map_err(|err| AuthError::BrowserLaunch(err.to_string()))
    }
}

impl<F> BrowserLauncher for F
where
    F: Fn(&Url) -> Result<(), AuthError> + Send + Sync,
{
    fn open(&self, url: &Url) -> Result<(), AuthError> {
        self(url)
    }
}
