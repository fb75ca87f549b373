//! Gitea webhook codec.
//!
//! Gitea payloads mirror GitHub's, so classification reuses the GitHub
//! payload shapes. Authentication differs: the secret travels inside the
//! JSON body.

use notify::Notification;
use serde_json::Value;

use super::github::{
    issue_comment_notification, issues_notification, pull_request_notification,
    push_notification,
};
use super::{secrets_match, PayloadCodec};
use crate::error::WatcherError;
use crate::response::WebhookRequest;

/// Header naming the Gitea event.
pub const EVENT_HEADER: &str = "x-gitea-event";

/// Body field carrying the configured secret.
pub const SECRET_FIELD: &str = "secret";

/// Codec for Gitea webhooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct GiteaCodec;

impl PayloadCodec for GiteaCodec {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    fn authenticate(&self, _request: &WebhookRequest, payload: &Value, secret: &str) -> bool {
        let sent = match payload.get(SECRET_FIELD) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        secrets_match(secret, &sent)
    }

    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError> {
        match request.normalized_header(EVENT_HEADER).as_str() {
            "pull_request" => pull_request_notification(payload),
            "issues" => issues_notification(payload),
            "issue_comment" => issue_comment_notification(payload),
            "push" => push_notification(payload),
            _ => Ok(None),
        }
    }
}
