//! GitHub webhook codec.

use hmac::{Hmac, Mac};
use notify::{commit_title, Notification, NotificationKind};
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use super::{decode, newest_commit, PayloadCodec};
use crate::error::WatcherError;
use crate::response::WebhookRequest;

/// Header naming the GitHub event.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying `<algorithm>=<hex digest>`.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// SHA-256 signature header sent alongside [`SIGNATURE_HEADER`].
pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";

/// Codec for GitHub webhooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubCodec;

impl PayloadCodec for GitHubCodec {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    fn authenticate(&self, request: &WebhookRequest, _payload: &Value, secret: &str) -> bool {
        let signature = if request.has_header(SIGNATURE_HEADER) {
            request.header(SIGNATURE_HEADER)
        } else {
            request.header(SIGNATURE_256_HEADER)
        };
        verify_signature(&request.body, signature, secret)
    }

    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError> {
        match request.normalized_header(EVENT_HEADER).as_str() {
            "issues" => issues_notification(payload),
            "issue_comment" => issue_comment_notification(payload),
            "pull_request" => pull_request_notification(payload),
            "push" => push_notification(payload),
            _ => Ok(None),
        }
    }
}

/// Verify a GitHub `x-hub-signature` value against the raw body.
///
/// The algorithm comes from the part before the first `=` (default
/// `sha1`); the rest is the hex digest, compared case-insensitively.
/// Unknown algorithms never verify.
#[must_use]
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let signature = signature.trim();
    if signature.is_empty() {
        return false;
    }

    let (algorithm, digest) = match signature.split_once('=') {
        Some((algorithm, digest)) => (algorithm.trim().to_lowercase(), digest),
        None => (String::new(), signature),
    };
    let algorithm = if algorithm.is_empty() {
        "sha1".to_string()
    } else {
        algorithm
    };

    let Some(computed) = hmac_hex(&algorithm, secret.as_bytes(), body) else {
        return false;
    };
    let digest = digest.trim().to_lowercase();

    computed.as_bytes().ct_eq(digest.as_bytes()).into()
}

/// Lowercase hex HMAC of `body` with the named algorithm.
pub(crate) fn hmac_hex(algorithm: &str, key: &[u8], body: &[u8]) -> Option<String> {
    match algorithm {
        "sha1" => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).ok()?;
            mac.update(body);
            Some(hex::encode(mac.finalize().into_bytes()))
        }
        "sha256" => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).ok()?;
            mac.update(body);
            Some(hex::encode(mac.finalize().into_bytes()))
        }
        "sha512" => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).ok()?;
            mac.update(body);
            Some(hex::encode(mac.finalize().into_bytes()))
        }
        _ => None,
    }
}

// =============================================================================
// Payload shapes (shared with Gitea, which mirrors GitHub's format)
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RepositoryRef {
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Subject {
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IssuesEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub issue: Option<Subject>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PullRequestEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub pull_request: Option<Subject>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PushCommit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PushEvent {
    #[serde(default)]
    pub commits: Option<Vec<PushCommit>>,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

fn repository_name(repository: Option<RepositoryRef>) -> Option<String> {
    repository.and_then(|r| r.full_name)
}

fn subject_notification(
    kind: NotificationKind,
    subject: Subject,
    repository: Option<RepositoryRef>,
) -> Notification {
    Notification::new(kind)
        .with_repository(repository_name(repository))
        .with_number(subject.number)
        .with_title(subject.title.as_deref())
        .with_url(subject.html_url)
}

fn action_kind(
    action: Option<&str>,
    opened: NotificationKind,
    closed: NotificationKind,
    reopened: NotificationKind,
) -> Option<NotificationKind> {
    match action.unwrap_or_default().trim().to_lowercase().as_str() {
        "opened" => Some(opened),
        "closed" => Some(closed),
        "reopened" => Some(reopened),
        _ => None,
    }
}

pub(crate) fn issues_notification(payload: &Value) -> Result<Option<Notification>, WatcherError> {
    let event: IssuesEvent = decode(payload)?;
    let Some(issue) = event.issue else {
        return Ok(None);
    };
    let Some(kind) = action_kind(
        event.action.as_deref(),
        NotificationKind::NewIssue,
        NotificationKind::ClosedIssue,
        NotificationKind::ReopenedIssue,
    ) else {
        return Ok(None);
    };

    Ok(Some(subject_notification(kind, issue, event.repository)))
}

pub(crate) fn issue_comment_notification(
    payload: &Value,
) -> Result<Option<Notification>, WatcherError> {
    let event: IssuesEvent = decode(payload)?;
    Ok(event.issue.map(|issue| {
        subject_notification(NotificationKind::NewIssueComment, issue, event.repository)
    }))
}

pub(crate) fn pull_request_notification(
    payload: &Value,
) -> Result<Option<Notification>, WatcherError> {
    let event: PullRequestEvent = decode(payload)?;
    let Some(pull_request) = event.pull_request else {
        return Ok(None);
    };
    let Some(kind) = action_kind(
        event.action.as_deref(),
        NotificationKind::NewPullRequest,
        NotificationKind::ClosedPullRequest,
        NotificationKind::ReopenedPullRequest,
    ) else {
        return Ok(None);
    };

    Ok(Some(subject_notification(kind, pull_request, event.repository)))
}

pub(crate) fn push_notification(payload: &Value) -> Result<Option<Notification>, WatcherError> {
    let event: PushEvent = decode(payload)?;
    let commits = event.commits.unwrap_or_default();
    let Some(head) = newest_commit(&commits, |c| c.timestamp.as_deref()) else {
        return Ok(None);
    };

    Ok(Some(
        Notification::new(NotificationKind::Push)
            .with_repository(repository_name(event.repository))
            .with_display_title(commit_title(head.message.as_deref(), head.id.as_deref()))
            .with_url(head.url.clone()),
    ))
}
