//! Presenter that writes notifications to the log.

use async_trait::async_trait;
use tracing::info;

use crate::error::PresentError;
use crate::events::{NotifyEvent, SuggestedAction};
use crate::NotificationPresenter;

/// Logs every notification and never selects an action.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

#[async_trait]
impl NotificationPresenter for LogPresenter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn present(
        &self,
        event: &NotifyEvent,
        actions: &[SuggestedAction],
    ) -> Result<Option<SuggestedAction>, PresentError> {
        let labels: Vec<&str> = actions.iter().map(SuggestedAction::label).collect();
        info!(
            source = %event.source,
            kind = event.notification.kind.as_str(),
            repository = ?event.notification.repository,
            number = ?event.notification.number,
            url = ?event.notification.url,
            actions = ?labels,
            "{}",
            event.display_message()
        );
        Ok(None)
    }

    async fn show_info(&self, message: &str) -> Result<(), PresentError> {
        info!("{message}");
        Ok(())
    }
}
