//! Watcher settings and notification policy.

use std::fmt;

use notify::NotificationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// A supported git hosting provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// GitHub (`x-github-event`)
    GitHub,
    /// GitLab (`x-gitlab-event`)
    GitLab,
    /// Bitbucket Cloud (`x-event-key`)
    Bitbucket,
    /// Gitea (`x-gitea-event`)
    Gitea,
}

impl Provider {
    /// Resolve a provider from its configured name.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. An
    /// empty name means GitHub.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "" | "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "bitbucket" => Ok(Self::Bitbucket),
            "gitea" => Ok(Self::Gitea),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }

    /// Display name used in log output and notification prefixes.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::GitLab => "GitLab",
            Self::Bitbucket => "Bitbucket",
            Self::Gitea => "Gitea",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Issue notification toggles. Unset toggles are on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueToggles {
    /// Notify when an issue has been opened
    #[serde(default, alias = "created")]
    pub opened: Option<bool>,
    /// Notify when an issue has been closed
    #[serde(default)]
    pub closed: Option<bool>,
    /// Notify when an issue has been re-opened
    #[serde(default)]
    pub reopened: Option<bool>,
    /// Notify when an issue received a comment
    #[serde(default)]
    pub new_comment: Option<bool>,
}

/// Pull request notification toggles. Unset toggles are on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestToggles {
    /// Notify when a pull request has been opened
    #[serde(default)]
    pub opened: Option<bool>,
    /// Notify when a pull request has been closed
    #[serde(default)]
    pub closed: Option<bool>,
    /// Notify when a pull request has been re-opened
    #[serde(default)]
    pub reopened: Option<bool>,
}

/// Settings for one watcher.
///
/// Immutable once a watcher has been built from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSettings {
    /// Provider name (`github`, `gitlab`, `bitbucket`, `gitea`)
    #[serde(default)]
    pub provider: Option<String>,
    /// Whether the watcher is enabled (default: true)
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Serve over HTTPS (default: false)
    #[serde(default)]
    pub secure: Option<bool>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Shared secret used to authenticate requests
    #[serde(default)]
    pub secret: Option<Value>,
    /// Issue notification toggles
    #[serde(default)]
    pub issues: Option<IssueToggles>,
    /// Pull request notification toggles
    #[serde(default)]
    pub pull_requests: Option<PullRequestToggles>,
    /// Notify about pushes (default: true)
    #[serde(default)]
    pub push: Option<bool>,
    /// CA file (secure only)
    #[serde(default)]
    pub ca: Option<String>,
    /// Certificate file (secure only)
    #[serde(default)]
    pub cert: Option<String>,
    /// Private key file (secure only)
    #[serde(default)]
    pub key: Option<String>,
}

impl WatcherSettings {
    /// Settings for the given provider with every other value defaulted.
    #[must_use]
    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::default()
        }
    }

    /// Build settings from one configured value.
    ///
    /// `null` means GitHub with defaults, a bare string (or other scalar)
    /// names the provider, and an object is read as-is.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Null => Ok(Self::for_provider("github")),
            Value::String(provider) => Ok(Self::for_provider(provider)),
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            Value::Array(_) => Err(ConfigError::InvalidSettings(serde::de::Error::custom(
                "nested lists of watcher settings are not supported",
            ))),
            other => Ok(Self::for_provider(other.to_string())),
        }
    }

    /// Resolve the provider.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        Provider::from_name(self.provider.as_deref().unwrap_or_default())
    }

    /// Whether the watcher is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Whether the watcher runs on HTTPS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(false)
    }

    /// The shared secret as a string, or `None` when not configured.
    ///
    /// Scalars are stringified; `null` and empty strings mean no secret.
    #[must_use]
    pub fn secret(&self) -> Option<String> {
        let secret = match self.secret.as_ref()? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (!secret.is_empty()).then_some(secret)
    }

    /// The per-event notification policy.
    #[must_use]
    pub fn policy(&self) -> NotifyPolicy {
        let issues = self.issues.clone().unwrap_or_default();
        let pulls = self.pull_requests.clone().unwrap_or_default();

        NotifyPolicy {
            new_issue: issues.opened.unwrap_or(true),
            closed_issue: issues.closed.unwrap_or(true),
            reopened_issue: issues.reopened.unwrap_or(true),
            new_issue_comment: issues.new_comment.unwrap_or(true),
            new_pull_request: pulls.opened.unwrap_or(true),
            closed_pull_request: pulls.closed.unwrap_or(true),
            reopened_pull_request: pulls.reopened.unwrap_or(true),
            push: self.push.unwrap_or(true),
        }
    }

    /// Display name: the configured name, else the provider's name.
    #[must_use]
    pub fn display_name(&self, provider: Provider) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map_or_else(|| provider.display_name().to_string(), String::from)
    }

    /// TLS file reference, ignoring blank values.
    #[must_use]
    pub fn tls_file(&self, file: TlsFile) -> Option<&str> {
        let value = match file {
            TlsFile::Ca => self.ca.as_deref(),
            TlsFile::Cert => self.cert.as_deref(),
            TlsFile::Key => self.key.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// One of the TLS files a watcher may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFile {
    /// CA bundle
    Ca,
    /// Server certificate
    Cert,
    /// Private key
    Key,
}

/// Which notification kinds a watcher emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct NotifyPolicy {
    pub new_issue: bool,
    pub closed_issue: bool,
    pub reopened_issue: bool,
    pub new_issue_comment: bool,
    pub new_pull_request: bool,
    pub closed_pull_request: bool,
    pub reopened_pull_request: bool,
    pub push: bool,
}

impl NotifyPolicy {
    /// Check if notifications of this kind should be emitted.
    #[must_use]
    pub const fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::NewIssue => self.new_issue,
            NotificationKind::ClosedIssue => self.closed_issue,
            NotificationKind::ReopenedIssue => self.reopened_issue,
            NotificationKind::NewIssueComment => self.new_issue_comment,
            NotificationKind::NewPullRequest => self.new_pull_request,
            NotificationKind::ClosedPullRequest => self.closed_pull_request,
            NotificationKind::ReopenedPullRequest => self.reopened_pull_request,
            NotificationKind::Push => self.push,
        }
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        WatcherSettings::default().policy()
    }
}
