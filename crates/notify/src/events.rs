//! Normalized git notification types.

use serde::{Deserialize, Serialize};

/// Titles longer than this many characters are cut and suffixed with `...`.
pub const MAX_TITLE_CHARS: usize = 48;

/// Commit identifiers are shortened to this many characters.
pub const SHORT_COMMIT_ID_CHARS: usize = 7;

/// Kind of a git notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A new issue was opened
    NewIssue,
    /// An issue was closed
    ClosedIssue,
    /// A closed issue was opened again
    ReopenedIssue,
    /// A new comment was added to an issue
    NewIssueComment,
    /// A new pull request was opened
    NewPullRequest,
    /// A pull request was closed
    ClosedPullRequest,
    /// A closed pull request was opened again
    ReopenedPullRequest,
    /// Commits were pushed
    Push,
}

impl NotificationKind {
    /// Get a short, stable name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewIssue => "new_issue",
            Self::ClosedIssue => "closed_issue",
            Self::ReopenedIssue => "reopened_issue",
            Self::NewIssueComment => "new_issue_comment",
            Self::NewPullRequest => "new_pull_request",
            Self::ClosedPullRequest => "closed_pull_request",
            Self::ReopenedPullRequest => "reopened_pull_request",
            Self::Push => "push",
        }
    }
}

/// A provider-agnostic git notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// What happened
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Repository in `owner/name` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Issue or pull request number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Display title, already truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Link to the subject in the provider's web UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Notification {
    /// Create a notification of the given kind with no details.
    #[must_use]
    pub const fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            repository: None,
            number: None,
            title: None,
            url: None,
        }
    }

    /// Set the repository, ignoring blank values.
    #[must_use]
    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = non_blank(repository);
        self
    }

    /// Set the issue or pull request number.
    #[must_use]
    pub const fn with_number(mut self, number: Option<u64>) -> Self {
        self.number = number;
        self
    }

    /// Set the title, truncating it for display.
    #[must_use]
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.title = title.map(truncate_title).filter(|t| !t.is_empty());
        self
    }

    /// Set a title that has already been formatted for display.
    #[must_use]
    pub fn with_display_title(mut self, title: Option<String>) -> Self {
        self.title = non_blank(title);
        self
    }

    /// Set the URL, ignoring blank values.
    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = non_blank(url);
        self
    }

    /// Render the `#12 'Title'` fragment used in messages.
    ///
    /// Returns an empty string when neither number nor title is known,
    /// otherwise the fragment prefixed with a single space.
    #[must_use]
    pub fn subject_suffix(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if let Some(number) = self.number {
            parts.push(format!("#{number}"));
        }
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            parts.push(format!("'{title}'"));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!(" {}", parts.join(" "))
        }
    }

    /// Compose the human-readable message for this notification.
    #[must_use]
    pub fn message(&self) -> String {
        let subject = self.subject_suffix();
        let repository = self.repository.as_deref().filter(|r| !r.is_empty());

        match (self.kind, repository) {
            (NotificationKind::NewIssue, Some(repo)) => {
                format!("New issue{subject} opened in '{repo}'!")
            }
            (NotificationKind::NewIssue, None) => format!("New issue opened{subject}!"),
            (NotificationKind::ClosedIssue, Some(repo)) => {
                format!("Issue{subject} closed in '{repo}'!")
            }
            (NotificationKind::ClosedIssue, None) => format!("Issue{subject} closed!"),
            (NotificationKind::ReopenedIssue, Some(repo)) => {
                format!("Issue{subject} has been re-opened in '{repo}'!")
            }
            (NotificationKind::ReopenedIssue, None) => {
                format!("Issue{subject} has been re-opened!")
            }
            (NotificationKind::NewIssueComment, Some(repo)) => {
                format!("New comment in issue{subject} of '{repo}'!")
            }
            (NotificationKind::NewIssueComment, None) => {
                format!("New comment in issue{subject}!")
            }
            (NotificationKind::NewPullRequest, Some(repo)) => {
                format!("New pull request{subject} in '{repo}'!")
            }
            (NotificationKind::NewPullRequest, None) => {
                format!("New pull request opened{subject}!")
            }
            (NotificationKind::ClosedPullRequest, Some(repo)) => {
                format!("Pull request{subject} closed in '{repo}'!")
            }
            (NotificationKind::ClosedPullRequest, None) => {
                format!("Pull request{subject} closed!")
            }
            (NotificationKind::ReopenedPullRequest, Some(repo)) => {
                format!("Pull request{subject} has been re-opened in '{repo}'!")
            }
            (NotificationKind::ReopenedPullRequest, None) => {
                format!("Pull request{subject} has been re-opened!")
            }
            (NotificationKind::Push, Some(repo)) => format!("New push{subject} to '{repo}'!"),
            (NotificationKind::Push, None) => format!("New push{subject}!"),
        }
    }

    /// Actions to offer alongside this notification.
    ///
    /// `Open` and `ShowUrl` are only offered when a URL is known; `Dismiss`
    /// is always the last entry.
    #[must_use]
    pub fn suggested_actions(&self) -> Vec<SuggestedAction> {
        let mut actions = vec![];
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            actions.push(SuggestedAction::Open(url.to_string()));
            actions.push(SuggestedAction::ShowUrl(url.to_string()));
        }
        actions.push(SuggestedAction::Dismiss);
        actions
    }
}

/// A notification together with the watcher that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEvent {
    /// Display name of the emitting watcher (e.g. `GitHub`)
    pub source: String,
    /// The normalized notification
    pub notification: Notification,
}

impl NotifyEvent {
    /// Wrap a notification with its source.
    #[must_use]
    pub fn new(source: impl Into<String>, notification: Notification) -> Self {
        Self {
            source: source.into(),
            notification,
        }
    }

    /// The message prefixed with the source, e.g. `[GitHub] New issue ...`.
    #[must_use]
    pub fn display_message(&self) -> String {
        format!("[{}] {}", self.source, self.notification.message())
            .trim()
            .to_string()
    }
}

/// Something the user may do with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "url", rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Open the URL in a browser
    Open(String),
    /// Display the URL
    ShowUrl(String),
    /// Close the notification
    Dismiss,
}

impl SuggestedAction {
    /// Label shown to the user.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Open(_) => "Open",
            Self::ShowUrl(_) => "Show URL",
            Self::Dismiss => "Close",
        }
    }
}

/// Truncate a title for display.
///
/// Titles are trimmed first. Anything longer than [`MAX_TITLE_CHARS`]
/// characters is cut, trailing whitespace of the cut is removed, and `...`
/// is appended.
#[must_use]
pub fn truncate_title(title: &str) -> String {
    let title = title.trim();
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }

    let cut: String = title.chars().take(MAX_TITLE_CHARS).collect();
    let cut = cut.trim_end();
    if cut.is_empty() {
        String::new()
    } else {
        format!("{cut}...")
    }
}

/// Build the display title of a pushed commit.
///
/// Produces `"<message> (<short-id>)"`, just the short id when there is no
/// message, or just the message when there is no id.
#[must_use]
pub fn commit_title(message: Option<&str>, id: Option<&str>) -> Option<String> {
    let message = truncate_title(message.unwrap_or_default());
    let id: String = id
        .unwrap_or_default()
        .trim()
        .chars()
        .take(SHORT_COMMIT_ID_CHARS)
        .collect();

    match (message.is_empty(), id.is_empty()) {
        (true, true) => None,
        (true, false) => Some(id),
        (false, true) => Some(message),
        (false, false) => Some(format!("{message} ({id})")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_title_long() {
        let title = "a".repeat(60);
        let truncated = truncate_title(&title);
        assert_eq!(truncated, format!("{}...", "a".repeat(48)));
    }

    #[test]
    fn test_truncate_title_exact_limit() {
        let title = "b".repeat(48);
        assert_eq!(truncate_title(&title), title);
    }

    #[test]
    fn test_truncate_title_counts_chars_not_bytes() {
        let title = "ä".repeat(48);
        assert_eq!(truncate_title(&title), title);
    }

    #[test]
    fn test_commit_title_formats() {
        assert_eq!(
            commit_title(Some("Fix build"), Some("0123456789abcdef")),
            Some("Fix build (0123456)".to_string())
        );
        assert_eq!(
            commit_title(None, Some("0123456789abcdef")),
            Some("0123456".to_string())
        );
        assert_eq!(commit_title(Some("  "), None), None);
    }

    #[test]
    fn test_message_with_repository() {
        let notification = Notification::new(NotificationKind::NewIssue)
            .with_repository(Some("octo/repo".to_string()))
            .with_number(Some(12))
            .with_title(Some("Crash on start"));

        assert_eq!(
            notification.message(),
            "New issue #12 'Crash on start' opened in 'octo/repo'!"
        );
    }

    #[test]
    fn test_message_without_repository() {
        let notification =
            Notification::new(NotificationKind::ClosedPullRequest).with_number(Some(3));
        assert_eq!(notification.message(), "Pull request #3 closed!");
    }

    #[test]
    fn test_suggested_actions() {
        let without_url = Notification::new(NotificationKind::Push);
        assert_eq!(without_url.suggested_actions(), vec![SuggestedAction::Dismiss]);

        let with_url = Notification::new(NotificationKind::Push)
            .with_url(Some("https://example.com/c/1".to_string()));
        assert_eq!(
            with_url.suggested_actions(),
            vec![
                SuggestedAction::Open("https://example.com/c/1".to_string()),
                SuggestedAction::ShowUrl("https://example.com/c/1".to_string()),
                SuggestedAction::Dismiss,
            ]
        );
    }

    #[test]
    fn test_display_message_prefix() {
        let event = NotifyEvent::new("GitLab", Notification::new(NotificationKind::Push));
        assert_eq!(event.display_message(), "[GitLab] New push!");
    }
}
