//! Opening notification URLs.

use async_trait::async_trait;

use crate::error::PresentError;

/// Opens URLs on behalf of the user.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    /// Open the URL without waiting for the opened application.
    async fn open(&self, url: &str) -> Result<(), PresentError>;
}

/// Opens URLs in the system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserOpener;

#[async_trait]
impl UrlOpener for BrowserOpener {
    async fn open(&self, url: &str) -> Result<(), PresentError> {
        let target = url.to_string();
        tokio::task::spawn_blocking(move || webbrowser::open(&target))
            .await
            .map_err(|e| PresentError::Other(format!("opener task failed: {e}")))?
            .map_err(|source| PresentError::Open {
                url: url.to_string(),
                source,
            })
    }
}
