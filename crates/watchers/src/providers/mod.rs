//! Provider payload codecs.
//!
//! Each codec authenticates a request with its provider's mechanism and maps
//! the provider's event taxonomy onto [`Notification`]. The set of codecs is
//! closed: adding a provider means one new [`Codec`] variant and one module.
//!
//! | Provider  | Event header     | Authentication                       |
//! |-----------|------------------|--------------------------------------|
//! | GitHub    | `x-github-event` | HMAC from `x-hub-signature`          |
//! | GitLab    | `x-gitlab-event` | `x-gitlab-token` equals secret       |
//! | Bitbucket | `x-event-key`    | none                                 |
//! | Gitea     | `x-gitea-event`  | `secret` field in the body           |

pub mod bitbucket;
pub mod gitea;
pub mod github;
pub mod gitlab;

use chrono::{DateTime, NaiveDateTime, Utc};
use notify::Notification;
use serde::de::DeserializeOwned;
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::error::WatcherError;
use crate::response::WebhookRequest;
use crate::settings::Provider;

pub use bitbucket::BitbucketCodec;
pub use gitea::GiteaCodec;
pub use github::GitHubCodec;
pub use gitlab::GitLabCodec;

/// Authenticate-and-classify logic for one provider's webhook format.
pub trait PayloadCodec: Send + Sync {
    /// Header that names the event; a request without it is not addressed
    /// to this provider.
    fn event_header(&self) -> &'static str;

    /// Check the request against the configured secret.
    ///
    /// Only called when a secret is configured.
    fn authenticate(&self, request: &WebhookRequest, payload: &Value, secret: &str) -> bool;

    /// Map the payload onto a notification.
    ///
    /// Returns `Ok(None)` for events this codec does not report and
    /// `Err(MalformedPayload)` when a known event has the wrong shape.
    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError>;
}

/// The codec of one supported provider.
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    GitHub(GitHubCodec),
    GitLab(GitLabCodec),
    Bitbucket(BitbucketCodec),
    Gitea(GiteaCodec),
}

impl Codec {
    /// Codec for a provider.
    #[must_use]
    pub const fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::GitHub => Self::GitHub(GitHubCodec),
            Provider::GitLab => Self::GitLab(GitLabCodec),
            Provider::Bitbucket => Self::Bitbucket(BitbucketCodec),
            Provider::Gitea => Self::Gitea(GiteaCodec),
        }
    }

    /// The provider this codec handles.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        match self {
            Self::GitHub(_) => Provider::GitHub,
            Self::GitLab(_) => Provider::GitLab,
            Self::Bitbucket(_) => Provider::Bitbucket,
            Self::Gitea(_) => Provider::Gitea,
        }
    }

    /// Whether this provider has a way to authenticate requests.
    #[must_use]
    pub const fn supports_authentication(&self) -> bool {
        !matches!(self, Self::Bitbucket(_))
    }

    fn inner(&self) -> &dyn PayloadCodec {
        match self {
            Self::GitHub(codec) => codec,
            Self::GitLab(codec) => codec,
            Self::Bitbucket(codec) => codec,
            Self::Gitea(codec) => codec,
        }
    }
}

impl PayloadCodec for Codec {
    fn event_header(&self) -> &'static str {
        self.inner().event_header()
    }

    fn authenticate(&self, request: &WebhookRequest, payload: &Value, secret: &str) -> bool {
        self.inner().authenticate(request, payload, secret)
    }

    fn classify(
        &self,
        request: &WebhookRequest,
        payload: &Value,
    ) -> Result<Option<Notification>, WatcherError> {
        self.inner().classify(request, payload)
    }
}

/// Deserialize a payload into a lenient provider structure.
pub(crate) fn decode<T: DeserializeOwned>(payload: &Value) -> Result<T, WatcherError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| WatcherError::MalformedPayload(e.to_string()))
}

/// Join separate owner and repository name fields as `owner/name`.
pub(crate) fn join_repository(owner: Option<&str>, name: Option<&str>) -> Option<String> {
    let owner = owner.map(str::trim).unwrap_or_default();
    let name = name.map(str::trim).unwrap_or_default();

    match (owner.is_empty(), name.is_empty()) {
        (true, true) => None,
        (true, false) => Some(name.to_string()),
        (false, true) => Some(owner.to_string()),
        (false, false) => Some(format!("{owner}/{name}")),
    }
}

/// Parse a commit timestamp. Unparsable values yield `None`.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f %z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

/// Pick the commit with the latest timestamp.
///
/// Unparsable timestamps sort as the earliest possible value. On ties the
/// commit listed first wins.
pub(crate) fn newest_commit<'a, T>(
    commits: &'a [T],
    timestamp: impl Fn(&T) -> Option<&str>,
) -> Option<&'a T> {
    let mut newest: Option<(&T, Option<DateTime<Utc>>)> = None;
    for commit in commits {
        let time = timestamp(commit).and_then(parse_timestamp);
        let is_newer = newest.as_ref().map_or(true, |(_, best)| time > *best);
        if is_newer {
            newest = Some((commit, time));
        }
    }
    newest.map(|(commit, _)| commit)
}

/// Compare two secrets in constant time.
pub(crate) fn secrets_match(expected: &str, actual: &str) -> bool {
    !actual.is_empty() && bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}

/// Lower-cased string form of a loosely typed JSON value.
pub(crate) fn normalized(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().to_lowercase(),
    }
}
