//! Bitbucket Cloud webhook codec.
//!
//! Bitbucket webhooks carry no signature, so a configured secret is never
//! checked for this provider.

use notify::{commit_title, Notification, NotificationKind};
use serde::Deserialize;
use serde_json::Value;

use super::{decode, join_repository, newest_commit, normalized, PayloadCodec};
use crate::error::WatcherError;
use crate::response::WebhookRequest;

/// Header naming the Bitbucket event, e.g. `issue:created`.
pub const EVENT_HEADER: &str = "x-event-key";

/// Codec for Bitbucket webhooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitbucketCodec;

impl PayloadCodec for BitbucketCodec {
    fn event_header(&self) -> &'static str {
        EVENT_HEADER
    }

    fn authenticate(&self, _request: &WebhookRequest, _payload: &Value, _secret: &str) -> bool {
        true
    }

    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError> {
        let event = request.normalized_header(EVENT_HEADER);

        if event.starts_with("issue:") {
            let payload: IssueEvent = decode(payload)?;
            Ok(issue_notification(&event, payload))
        } else if event.starts_with("pullrequest:") {
            let payload: PullRequestEvent = decode(payload)?;
            Ok(pull_request_notification(&event, payload))
        } else if event == "repo:push" {
            let payload: PushEvent = decode(payload)?;
            Ok(push_notification(payload))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Href {
    #[serde(default)]
    href: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    html: Option<Href>,
}

impl Links {
    fn html(links: Option<&Self>) -> Option<String> {
        links
            .and_then(|l| l.html.as_ref())
            .and_then(|h| h.href.as_deref())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Owner {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    owner: Option<Owner>,
}

fn repository_name(repository: Option<&Repository>) -> Option<String> {
    let repository = repository?;
    join_repository(
        repository.owner.as_ref().and_then(|o| o.username.as_deref()),
        repository.name.as_deref(),
    )
}

#[derive(Debug, Default, Deserialize)]
struct Subject {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    links: Option<Links>,
}

impl Subject {
    fn notification(&self, kind: NotificationKind, repository: Option<&Repository>) -> Notification {
        Notification::new(kind)
            .with_repository(repository_name(repository))
            .with_number(self.id)
            .with_title(self.title.as_deref())
            .with_url(Links::html(self.links.as_ref()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatusChange {
    #[serde(default, rename = "new")]
    new_status: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Changes {
    #[serde(default)]
    status: Option<StatusChange>,
}

#[derive(Debug, Default, Deserialize)]
struct IssueEvent {
    #[serde(default)]
    issue: Option<Subject>,
    #[serde(default)]
    changes: Option<Changes>,
    #[serde(default)]
    repository: Option<Repository>,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestEvent {
    #[serde(default)]
    pullrequest: Option<Subject>,
    #[serde(default)]
    repository: Option<Repository>,
}

#[derive(Debug, Default, Deserialize)]
struct Commit {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct PushChange {
    #[serde(default)]
    commits: Option<Vec<Commit>>,
}

#[derive(Debug, Default, Deserialize)]
struct Push {
    #[serde(default)]
    changes: Option<Vec<PushChange>>,
}

#[derive(Debug, Default, Deserialize)]
struct PushEvent {
    #[serde(default)]
    push: Option<Push>,
    #[serde(default)]
    repository: Option<Repository>,
}

fn issue_notification(event: &str, payload: IssueEvent) -> Option<Notification> {
    let issue = payload.issue.as_ref()?;

    let kind = match event {
        "issue:created" => NotificationKind::NewIssue,
        "issue:updated" => {
            let status = payload
                .changes
                .as_ref()
                .and_then(|c| c.status.as_ref())
                .map(|s| normalized(s.new_status.as_ref()))?;
            match status.as_str() {
                "open" => NotificationKind::ReopenedIssue,
                "resolved" => NotificationKind::ClosedIssue,
                _ => return None,
            }
        }
        _ => return None,
    };

    Some(issue.notification(kind, payload.repository.as_ref()))
}

fn pull_request_notification(event: &str, payload: PullRequestEvent) -> Option<Notification> {
    let pull_request = payload.pullrequest.as_ref()?;

    let kind = match event {
        "pullrequest:created" => NotificationKind::NewPullRequest,
        "pullrequest:rejected" => NotificationKind::ClosedPullRequest,
        _ => return None,
    };

    Some(pull_request.notification(kind, payload.repository.as_ref()))
}

fn push_notification(payload: PushEvent) -> Option<Notification> {
    let commits: Vec<Commit> = payload
        .push?
        .changes
        .unwrap_or_default()
        .into_iter()
        .flat_map(|change| change.commits.unwrap_or_default())
        .collect();
    let head = newest_commit(&commits, |c| c.date.as_deref())?;

    Some(
        Notification::new(NotificationKind::Push)
            .with_repository(repository_name(payload.repository.as_ref()))
            .with_display_title(commit_title(head.message.as_deref(), head.hash.as_deref()))
            .with_url(Links::html(head.links.as_ref())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue, Method};
    use serde_json::json;

    fn classify(event: &str, payload: &Value) -> Option<Notification> {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        let request = WebhookRequest::new(Method::POST, headers, Bytes::new());
        BitbucketCodec.classify(&request, payload).unwrap()
    }

    fn repository() -> Value {
        json!({ "name": "widgets", "owner": { "username": "acme" } })
    }

    #[test]
    fn test_issue_created() {
        let payload = json!({
            "issue": {
                "id": 11,
                "title": "Button misaligned",
                "links": { "html": { "href": "https://bitbucket.org/acme/widgets/issues/11" } }
            },
            "repository": repository()
        });
        let notification = classify("issue:created", &payload).unwrap();
        assert_eq!(notification.kind, NotificationKind::NewIssue);
        assert_eq!(notification.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(notification.number, Some(11));
        assert_eq!(
            notification.url.as_deref(),
            Some("https://bitbucket.org/acme/widgets/issues/11")
        );
    }

    #[test]
    fn test_issue_status_updates() {
        let resolved = json!({
            "issue": { "id": 2 },
            "changes": { "status": { "old": "open", "new": "resolved" } }
        });
        assert_eq!(
            classify("issue:updated", &resolved).unwrap().kind,
            NotificationKind::ClosedIssue
        );

        let reopened = json!({
            "issue": { "id": 2 },
            "changes": { "status": { "new": "open" } }
        });
        assert_eq!(
            classify("issue:updated", &reopened).unwrap().kind,
            NotificationKind::ReopenedIssue
        );

        let retitled = json!({ "issue": { "id": 2 }, "changes": { "title": {} } });
        assert!(classify("issue:updated", &retitled).is_none());
    }

    #[test]
    fn test_pull_requests() {
        let payload = json!({ "pullrequest": { "id": 8, "title": "Refactor" } });
        assert_eq!(
            classify("pullrequest:created", &payload).unwrap().kind,
            NotificationKind::NewPullRequest
        );
        assert_eq!(
            classify("pullrequest:rejected", &payload).unwrap().kind,
            NotificationKind::ClosedPullRequest
        );
        assert!(classify("pullrequest:fulfilled", &payload).is_none());
    }

    #[test]
    fn test_push_picks_newest_across_changes() {
        let payload = json!({
            "repository": repository(),
            "push": {
                "changes": [
                    { "commits": [{
                        "hash": "0123456789abcdef",
                        "message": "older change",
                        "date": "2024-02-01T10:00:00+00:00",
                        "links": { "html": { "href": "https://bitbucket.org/acme/widgets/commits/0123456" } }
                    }] },
                    { "commits": [{
                        "hash": "fedcba9876543210",
                        "message": "newer change",
                        "date": "2024-02-01T12:00:00+00:00",
                        "links": { "html": { "href": "https://bitbucket.org/acme/widgets/commits/fedcba9" } }
                    }] }
                ]
            }
        });
        let notification = classify("repo:push", &payload).unwrap();
        assert_eq!(notification.kind, NotificationKind::Push);
        assert_eq!(notification.title.as_deref(), Some("newer change (fedcba9)"));
        assert_eq!(
            notification.url.as_deref(),
            Some("https://bitbucket.org/acme/widgets/commits/fedcba9")
        );
        assert_eq!(notification.repository.as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn test_push_without_commits() {
        assert!(classify("repo:push", &json!({ "push": { "changes": [] } })).is_none());
        assert!(classify("repo:push", &json!({})).is_none());
    }

    #[test]
    fn test_never_requires_authentication() {
        let request = WebhookRequest::new(Method::POST, HeaderMap::new(), Bytes::new());
        assert!(BitbucketCodec.authenticate(&request, &json!({}), "secret"));
    }
}
