//! Error types for notification presentation.

use thiserror::Error;

/// Errors that can occur while presenting a notification or acting on it.
#[derive(Debug, Error)]
pub enum PresentError {
    /// The presenter could not display the notification
    #[error("presenter '{presenter}' failed: {message}")]
    Presenter { presenter: String, message: String },

    /// The URL could not be opened
    #[error("failed to open {url}: {source}")]
    Open {
        url: String,
        source: std::io::Error,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}
