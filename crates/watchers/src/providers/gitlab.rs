//! GitLab webhook codec.
//!
//! Issue and merge request hooks share one rule set: a state change in
//! `changes.state.current` wins (`closed` means closed, `opened` means
//! reopened) and any other hook reports a newly opened subject.

use notify::{commit_title, Notification, NotificationKind};
use serde::Deserialize;
use serde_json::Value;

use super::{decode, join_repository, newest_commit, normalized, secrets_match, PayloadCodec};
use crate::error::WatcherError;
use crate::response::WebhookRequest;

/// Header naming the GitLab event.
pub const EVENT_HEADER: &str = "x-gitlab-event";

/// Header carrying the configured secret token.
pub const TOKEN_HEADER: &str = "x-gitlab-token";

/// Codec for GitLab webhooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitLabCodec;

impl PayloadCodec for GitLabCodec {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    fn authenticate(&self, request: &WebhookRequest, _payload: &Value, secret: &str) -> bool {
        secrets_match(secret, request.header(TOKEN_HEADER))
    }

    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError> {
        let hook = request.normalized_header(EVENT_HEADER);
        if !matches!(
            hook.as_str(),
            "issue hook" | "note hook" | "merge request hook" | "push hook"
        ) {
            return Ok(None);
        }

        let event: HookEvent = decode(payload)?;
        let notification = match hook.as_str() {
            "issue hook" => Some(event.subject_notification(Subject::Issue)),
            "note hook" => Some(event.note_notification()),
            "merge request hook" => Some(event.subject_notification(Subject::MergeRequest)),
            _ => event.push_notification(),
        };
        Ok(notification)
    }
}

#[derive(Debug, Clone, Copy)]
enum Subject {
    Issue,
    MergeRequest,
}

impl Subject {
    const fn kinds(self) -> [NotificationKind; 3] {
        match self {
            Self::Issue => [
                NotificationKind::NewIssue,
                NotificationKind::ClosedIssue,
                NotificationKind::ReopenedIssue,
            ],
            Self::MergeRequest => [
                NotificationKind::NewPullRequest,
                NotificationKind::ClosedPullRequest,
                NotificationKind::ReopenedPullRequest,
            ],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StateChange {
    #[serde(default)]
    current: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Changes {
    #[serde(default)]
    state: Option<StateChange>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectAttributes {
    #[serde(default)]
    iid: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotedIssue {
    #[serde(default)]
    iid: Option<u64>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Project {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    path_with_namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Commit {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HookEvent {
    #[serde(default)]
    changes: Option<Changes>,
    #[serde(default)]
    object_attributes: Option<ObjectAttributes>,
    #[serde(default)]
    issue: Option<NotedIssue>,
    #[serde(default)]
    project: Option<Project>,
    #[serde(default)]
    repository: Option<Repository>,
    #[serde(default)]
    commits: Option<Vec<Commit>>,
}

impl HookEvent {
    fn repository(&self) -> Option<String> {
        let namespace = self.project.as_ref().and_then(|p| p.namespace.as_deref());
        let name = self.repository.as_ref().and_then(|r| r.name.as_deref());

        join_repository(namespace, name).or_else(|| {
            self.project
                .as_ref()
                .and_then(|p| p.path_with_namespace.clone())
        })
    }

    fn state_change(&self) -> Option<String> {
        self.changes
            .as_ref()
            .and_then(|c| c.state.as_ref())
            .map(|s| normalized(s.current.as_ref()))
    }

    fn subject_kind(&self, subject: Subject) -> NotificationKind {
        let [new, closed, reopened] = subject.kinds();
        match self.state_change().as_deref() {
            Some("closed") => closed,
            Some("opened") => reopened,
            _ => new,
        }
    }

    fn subject_notification(&self, subject: Subject) -> Notification {
        let kind = self.subject_kind(subject);
        let attributes = self.object_attributes.as_ref();

        Notification::new(kind)
            .with_repository(self.repository())
            .with_number(attributes.and_then(|a| a.iid))
            .with_title(attributes.and_then(|a| a.title.as_deref()))
            .with_url(attributes.and_then(|a| a.url.clone()))
    }

    fn note_notification(&self) -> Notification {
        let attributes = self.object_attributes.as_ref();
        let (number, title) = match &self.issue {
            Some(issue) => (issue.iid, issue.title.as_deref()),
            None => (
                attributes.and_then(|a| a.iid),
                attributes.and_then(|a| a.title.as_deref()),
            ),
        };

        Notification::new(NotificationKind::NewIssueComment)
            .with_repository(self.repository())
            .with_number(number)
            .with_title(title)
            .with_url(attributes.and_then(|a| a.url.clone()))
    }

    fn push_notification(&self) -> Option<Notification> {
        let commits = self.commits.as_deref().unwrap_or_default();
        let head = newest_commit(commits, |c| c.timestamp.as_deref())?;

        Some(
            Notification::new(NotificationKind::Push)
                .with_repository(self.repository())
                .with_display_title(commit_title(head.message.as_deref(), head.id.as_deref()))
                .with_url(head.url.clone()),
        )
    }
}
