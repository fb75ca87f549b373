//! Notification presenter implementations.

pub mod log;

use async_trait::async_trait;

use crate::error::PresentError;
use crate::events::{NotifyEvent, SuggestedAction};

/// Displays notifications to the user and reports the chosen action.
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    /// Get the name of this presenter.
    fn name(&self) -> &'static str;

    /// Present an event with the actions the user may pick from.
    ///
    /// Returns the chosen action, or `None` when the user made no choice.
    async fn present(
        &self,
        event: &NotifyEvent,
        actions: &[SuggestedAction],
    ) -> Result<Option<SuggestedAction>, PresentError>;

    /// Display a plain informational message.
    async fn show_info(&self, message: &str) -> Result<(), PresentError>;
}
