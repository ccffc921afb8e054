use std::path::Path;

use async_trait::async_trait;

use super::error::DriverError;

/// One running browser instance, exclusively owned by whoever holds it.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Screenshot of the whole document, not only the viewport, written as PNG to `path`.
    async fn save_full_page_screenshot(&mut self, path: &Path) -> Result<(), DriverError>;

    /// Terminates the browser process. Called once, at pool teardown.
    async fn quit(&mut self) -> Result<(), DriverError>;
}

/// Creates browser instances already configured for the crawl (proxy, headless).
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Driver: BrowserDriver + 'static;

    async fn launch(&self, id: usize) -> Result<Self::Driver, DriverError>;
}
