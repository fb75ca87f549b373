//! Turning configuration into running listener groups.
//!
//! [`provision`] is the pure grouping step: it builds every enabled watcher
//! and buckets it by `(secure, port)`. [`WatcherHost`] owns the running set
//! and replaces it wholesale on every reload.

use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use notify::NotifySender;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{resolve_port, NotifyConfig};
use crate::error::{ConfigError, ListenerError};
use crate::listener::{GroupKey, ListenerGroup, ListenerOptions};
use crate::settings::WatcherSettings;
use crate::watcher::Watcher;

/// A configuration entry that could not be turned into a watcher.
#[derive(Debug)]
pub struct EntryError {
    /// Port label the entry was configured under
    pub label: String,
    /// Position of the entry within its label, starting at 0
    pub index: usize,
    pub error: ConfigError,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.label.trim().is_empty() {
            "(default)"
        } else {
            self.label.trim()
        };
        write!(
            f,
            "could not create watcher for entry #{} of port {label}: {}",
            self.index + 1,
            self.error
        )
    }
}

/// Watchers grouped by listener, plus the entries that failed.
#[derive(Debug, Default)]
pub struct ProvisionPlan {
    /// Watchers per group, in start order
    pub groups: BTreeMap<GroupKey, Vec<Watcher>>,
    pub errors: Vec<EntryError>,
}

impl ProvisionPlan {
    /// Group keys in start order.
    #[must_use]
    pub fn keys(&self) -> Vec<GroupKey> {
        self.groups.keys().copied().collect()
    }
}

/// Build and group every enabled watcher of a configuration.
///
/// One bad entry never stops the rest; it is recorded in
/// [`ProvisionPlan::errors`]. Watchers are returned stopped.
#[must_use]
pub fn provision(config: &NotifyConfig, sender: &NotifySender) -> ProvisionPlan {
    let mut plan = ProvisionPlan::default();
    if config.is_disabled() {
        return plan;
    }

    let denied = config.denied_ports();
    let allowed = config.allowed_ports();

    for (label, value) in &config.watchers {
        let entries = match value {
            Value::Array(entries) => entries.clone(),
            single => vec![single.clone()],
        };

        for (index, entry) in entries.into_iter().enumerate() {
            let result = build_entry(label, entry, denied.as_deref(), allowed.as_deref(), sender);
            match result {
                Ok(Some((key, watcher))) => plan.groups.entry(key).or_default().push(watcher),
                Ok(None) => {}
                Err(error) => plan.errors.push(EntryError {
                    label: label.clone(),
                    index,
                    error,
                }),
            }
        }
    }

    plan
}

fn build_entry(
    label: &str,
    entry: Value,
    denied: Option<&[u16]>,
    allowed: Option<&[u16]>,
    sender: &NotifySender,
) -> Result<Option<(GroupKey, Watcher)>, ConfigError> {
    let settings = WatcherSettings::from_value(entry)?;
    if !settings.is_enabled() {
        return Ok(None);
    }

    let secure = settings.is_secure();
    let port = resolve_port(label, secure)?;
    if denied.is_some_and(|ports| ports.contains(&port)) {
        return Ok(None);
    }
    if allowed.is_some_and(|ports| !ports.contains(&port)) {
        return Ok(None);
    }

    let watcher = Watcher::new(settings, sender.clone())?;
    Ok(Some((GroupKey::new(secure, port), watcher)))
}

/// What a reprovisioning pass did.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Groups now running, in start order
    pub started: Vec<GroupKey>,
    /// Groups that failed to start
    pub failed: Vec<(GroupKey, ListenerError)>,
    /// Entries that could not be turned into watchers
    pub entry_errors: Vec<EntryError>,
}

/// Owns the running set of listener groups.
#[derive(Debug)]
pub struct WatcherHost {
    options: ListenerOptions,
    sender: NotifySender,
    groups: Vec<ListenerGroup>,
}

impl WatcherHost {
    #[must_use]
    pub const fn new(options: ListenerOptions, sender: NotifySender) -> Self {
        Self {
            options,
            sender,
            groups: Vec::new(),
        }
    }

    /// The running groups, in start order.
    #[must_use]
    pub fn groups(&self) -> &[ListenerGroup] {
        &self.groups
    }

    /// Keys of the running groups.
    #[must_use]
    pub fn running(&self) -> Vec<GroupKey> {
        self.groups.iter().map(ListenerGroup::key).collect()
    }

    /// Replace the running set with one built from `config`.
    ///
    /// Every current group is shut down before the new set is bound. Groups
    /// that fail to start are logged and left out.
    pub async fn reprovision(&mut self, config: &NotifyConfig) -> ProvisionReport {
        self.shutdown().await;

        let plan = provision(config, &self.sender);
        for entry in &plan.errors {
            warn!(port = %entry.label, index = entry.index, "{entry}");
        }

        let mut report = ProvisionReport {
            entry_errors: plan.errors,
            ..ProvisionReport::default()
        };

        for (key, watchers) in plan.groups {
            match ListenerGroup::start(key, watchers, &self.options).await {
                Ok(group) => {
                    report.started.push(key);
                    self.groups.push(group);
                }
                Err(e) => {
                    error!(secure = key.secure, port = key.port, error = %e, "Failed to start listener group");
                    report.failed.push((key, e));
                }
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            invalid_entries = report.entry_errors.len(),
            "Watchers provisioned"
        );
        report
    }

    /// Shut down every running group.
    pub async fn shutdown(&mut self) {
        let groups = std::mem::take(&mut self.groups);
        join_all(groups.into_iter().map(ListenerGroup::shutdown)).await;
    }
}
