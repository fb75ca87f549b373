//! A configured webhook watcher.
//!
//! Every watcher runs the same validation pipeline and only differs in the
//! [`Codec`] it delegates authentication and classification to:
//!
//! 1. method must be `POST` (405)
//! 2. the request must carry headers (402)
//! 3. content type must be `application/json` (406, JSON content type)
//! 4. the provider's event header must be present, else the request is not
//!    addressed to this watcher and nothing is written
//! 5. the body must be a JSON object (400)
//! 6. when a secret is configured, the request must authenticate (404)
//! 7. the event is classified and, if the policy allows it, emitted
//!
//! A watcher that finishes without an earlier writer answers 204.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::{header, Method, StatusCode};
use notify::{Notification, NotifyEvent, NotifySender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, WatcherError};
use crate::providers::{Codec, PayloadCodec};
use crate::response::{WebhookRequest, WebhookResponse};
use crate::settings::{NotifyPolicy, Provider, WatcherSettings};

/// What a watcher did with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The watcher is not running
    Stopped,
    /// The request did not carry this provider's event header
    NotAddressed,
    /// The request was valid but produced no notification
    Ignored,
    /// A notification was emitted
    Notified,
    /// The request was rejected with this status
    Rejected(StatusCode),
}

enum Processed {
    NotAddressed,
    Ignored,
    Notification(Notification),
}

/// One configured watcher: settings, provider codec, and running state.
#[derive(Debug)]
pub struct Watcher {
    settings: WatcherSettings,
    codec: Codec,
    name: String,
    policy: NotifyPolicy,
    secret: Option<String>,
    running: AtomicBool,
    sender: NotifySender,
}

impl Watcher {
    /// Build a watcher from its settings.
    ///
    /// Fails for unknown providers. The watcher starts out stopped.
    pub fn new(settings: WatcherSettings, sender: NotifySender) -> Result<Self, ConfigError> {
        let provider = settings.provider()?;
        let codec = Codec::for_provider(provider);
        let name = settings.display_name(provider);
        let secret = settings.secret();

        if secret.is_some() && !codec.supports_authentication() {
            warn!(
                provider = %provider,
                watcher = %name,
                "{provider} webhooks cannot be authenticated; the configured secret is ignored"
            );
        }

        Ok(Self {
            policy: settings.policy(),
            settings,
            codec,
            name,
            secret,
            running: AtomicBool::new(false),
            sender,
        })
    }

    /// The settings this watcher was built from.
    #[must_use]
    pub const fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.codec.provider()
    }

    /// Display name used as the notification source.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start handling requests. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let started = !self.running.swap(true, Ordering::SeqCst);
        if started {
            info!(provider = %self.provider(), watcher = %self.name, "Watcher started");
        }
        started
    }

    /// Stop handling requests. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let stopped = self.running.swap(false, Ordering::SeqCst);
        if stopped {
            info!(provider = %self.provider(), watcher = %self.name, "Watcher stopped");
        }
        stopped
    }

    /// Release the watcher, stopping it if still running.
    pub fn dispose(&self) {
        self.stop();
    }

    /// Handle one request, writing to the shared response when it is still
    /// unsent.
    ///
    /// Never fails: rejections become the response status, and faults
    /// (including panics in provider logic) become a 500 with the fault
    /// text. Once another participant has sent the response, this
    /// watcher's own output is suppressed.
    pub fn handle(&self, request: &WebhookRequest, response: &mut WebhookResponse) -> HandleOutcome {
        if !self.is_running() {
            return HandleOutcome::Stopped;
        }

        let processed = panic::catch_unwind(AssertUnwindSafe(|| self.process(request)))
            .unwrap_or_else(|panic| Err(WatcherError::Internal(panic_message(&*panic))));

        let result = processed.and_then(|processed| match processed {
            Processed::NotAddressed => Ok(HandleOutcome::NotAddressed),
            Processed::Ignored => Ok(HandleOutcome::Ignored),
            Processed::Notification(notification) => {
                self.emit(notification).map(|()| HandleOutcome::Notified)
            }
        });

        match result {
            Ok(HandleOutcome::NotAddressed) => HandleOutcome::NotAddressed,
            Ok(outcome) => {
                if !response.headers_sent() {
                    let _ = response.write_head(StatusCode::NO_CONTENT);
                }
                outcome
            }
            Err(error) => self.reject(response, &error),
        }
    }

    fn process(&self, request: &WebhookRequest) -> Result<Processed, WatcherError> {
        if !request.method.as_str().eq_ignore_ascii_case(Method::POST.as_str()) {
            return Err(WatcherError::MethodNotAllowed);
        }
        if request.headers.is_empty() {
            return Err(WatcherError::MissingHeaders);
        }
        if request.normalized_header(header::CONTENT_TYPE.as_str()) != "application/json" {
            return Err(WatcherError::UnsupportedContentType);
        }
        if !request.has_header(self.codec.event_header()) {
            return Ok(Processed::NotAddressed);
        }

        let payload: Value = serde_json::from_slice(&request.body)
            .map_err(|e| WatcherError::MalformedPayload(e.to_string()))?;
        if !payload.is_object() {
            return Err(WatcherError::MalformedPayload(
                "payload is not a JSON object".to_string(),
            ));
        }

        if let Some(secret) = &self.secret {
            if !self.codec.authenticate(request, &payload, secret) {
                return Err(WatcherError::NotAuthenticated);
            }
        }

        let Some(notification) = self.codec.classify(request, &payload)? else {
            return Ok(Processed::Ignored);
        };
        if !self.policy.allows(notification.kind) {
            debug!(
                watcher = %self.name,
                kind = notification.kind.as_str(),
                "Notification disabled by settings"
            );
            return Ok(Processed::Ignored);
        }

        Ok(Processed::Notification(notification))
    }

    fn emit(&self, notification: Notification) -> Result<(), WatcherError> {
        info!(
            provider = %self.provider(),
            watcher = %self.name,
            kind = notification.kind.as_str(),
            repository = notification.repository.as_deref().unwrap_or_default(),
            "Emitting notification"
        );
        self.sender
            .send(NotifyEvent::new(self.name.clone(), notification))
            .map_err(|_| WatcherError::Internal("notification channel closed".to_string()))
    }

    fn reject(&self, response: &mut WebhookResponse, error: &WatcherError) -> HandleOutcome {
        let status = error.status_code();
        let written = match error {
            WatcherError::Internal(message) => {
                warn!(watcher = %self.name, error = %message, "Watcher failed");
                response.write_text(status, message)
            }
            WatcherError::UnsupportedContentType => response.write_head_json(status),
            _ => response.write_head(status),
        };

        match written {
            Ok(()) => debug!(
                watcher = %self.name,
                status = status.as_u16(),
                error = %error,
                "Request rejected"
            ),
            Err(e) => debug!(
                watcher = %self.name,
                status = status.as_u16(),
                error = %error,
                "Rejection suppressed: {e}"
            ),
        }
        HandleOutcome::Rejected(status)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "watcher panicked".to_string())
}
