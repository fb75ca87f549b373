//! Normalized git notifications and their presentation.
//!
//! This crate provides the provider-agnostic [`Notification`] produced by
//! webhook watchers and the outbound side that shows it to the user.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notification, NotificationKind, Notifier, NotifyEvent};
//!
//! # async fn demo() {
//! let notifier = Notifier::from_env();
//! let (sender, receiver) = notify::channel();
//!
//! let handle = tokio::spawn(notifier.run(receiver));
//!
//! sender
//!     .send(NotifyEvent::new(
//!         "GitHub",
//!         Notification::new(NotificationKind::NewIssue).with_number(Some(7)),
//!     ))
//!     .ok();
//!
//! drop(sender);
//! handle.await.ok();
//! # }
//! ```
//!
//! # Configuration
//!
//! - `NOTIFY_DISABLED`: Set to "true" to drop all notifications
//!
//! # Architecture
//!
//! - [`NotificationPresenter`] displays an event and reports the chosen action
//! - [`UrlOpener`] performs the `Open` action
//! - [`Notifier`] consumes the typed event channel and wires both together

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;
pub mod opener;

pub use channels::log::LogPresenter;
pub use channels::NotificationPresenter;
pub use error::PresentError;
pub use events::{
    commit_title, truncate_title, Notification, NotificationKind, NotifyEvent, SuggestedAction,
};
pub use opener::{BrowserOpener, UrlOpener};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Sending half of the notification channel, held by watchers.
pub type NotifySender = mpsc::UnboundedSender<NotifyEvent>;

/// Receiving half of the notification channel, consumed by [`Notifier::run`].
pub type NotifyReceiver = mpsc::UnboundedReceiver<NotifyEvent>;

/// Create the typed channel that carries notifications from watchers.
#[must_use]
pub fn channel() -> (NotifySender, NotifyReceiver) {
    mpsc::unbounded_channel()
}

/// Presents notifications and performs the action the user picks.
#[derive(Clone)]
pub struct Notifier {
    presenter: Arc<dyn NotificationPresenter>,
    opener: Arc<dyn UrlOpener>,
    disabled: bool,
}

impl Notifier {
    /// Create a notifier that logs notifications and opens URLs in the browser.
    ///
    /// Honors `NOTIFY_DISABLED`.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
        }

        Self {
            presenter: Arc::new(LogPresenter),
            opener: Arc::new(BrowserOpener),
            disabled,
        }
    }

    /// Create a notifier with a specific presenter and opener.
    #[must_use]
    pub fn new(presenter: Arc<dyn NotificationPresenter>, opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            presenter,
            opener,
            disabled: false,
        }
    }

    /// Create a notifier that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            presenter: Arc::new(LogPresenter),
            opener: Arc::new(BrowserOpener),
            disabled: true,
        }
    }

    /// Check if events are being dropped.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Consume events until every sender has been dropped.
    ///
    /// Each event is presented on its own task, so a presenter waiting on
    /// the user never holds up later events.
    pub async fn run(self, mut receiver: NotifyReceiver) {
        while let Some(event) = receiver.recv().await {
            self.notify(event);
        }
        debug!("Notification channel closed");
    }

    /// Present an event in the background (fire-and-forget).
    ///
    /// Errors are logged but not propagated to the caller.
    pub fn notify(&self, event: NotifyEvent) {
        if self.disabled {
            debug!("Notifications disabled, skipping event");
            return;
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_and_wait(&event).await {
                error!(
                    presenter = notifier.presenter.name(),
                    source = %event.source,
                    error = %e,
                    "Failed to present notification"
                );
            }
        });
    }

    /// Present an event, then perform the chosen action.
    ///
    /// Returns the action the presenter selected.
    pub async fn notify_and_wait(
        &self,
        event: &NotifyEvent,
    ) -> Result<Option<SuggestedAction>, PresentError> {
        if self.disabled {
            return Ok(None);
        }

        let actions = event.notification.suggested_actions();
        let chosen = self.presenter.present(event, &actions).await?;

        match &chosen {
            Some(SuggestedAction::Open(url)) => {
                debug!(url = %url, "Opening notification URL");
                self.opener.open(url).await?;
            }
            Some(SuggestedAction::ShowUrl(url)) => {
                self.presenter.show_info(url).await?;
            }
            Some(SuggestedAction::Dismiss) | None => {}
        }

        Ok(chosen)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}
