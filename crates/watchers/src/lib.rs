//! Git provider webhook listeners.
//!
//! Watchers receive webhooks from GitHub, GitLab, Bitbucket, and Gitea,
//! authenticate them, and turn recognized events into
//! [`notify::Notification`]s sent over the notification channel.
//!
//! # Usage
//!
//! ```no_run
//! use watchers::{ListenerOptions, NotifyConfig, WatcherHost};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NotifyConfig::load("git-notify.yaml")?;
//! let (sender, receiver) = notify::channel();
//! tokio::spawn(notify::Notifier::from_env().run(receiver));
//!
//! let mut host = WatcherHost::new(ListenerOptions::default(), sender);
//! let report = host.reprovision(&config).await;
//! println!("{} listener groups running", report.started.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`provision`] buckets configured watchers by `(secure, port)`
//! - [`ListenerGroup`] binds one socket and dispatches each request to its
//!   watchers in order
//! - [`Watcher`] validates a request and delegates to its provider [`Codec`]
//! - [`WatcherHost`] owns the running groups and swaps them on reload

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod listener;
pub mod providers;
pub mod provisioner;
pub mod response;
pub mod settings;
pub mod tls;
pub mod watcher;

pub use config::{NotifyConfig, ServiceConfig};
pub use error::{ConfigError, ListenerError, ResponseError, WatcherError};
pub use listener::{webhook_router, GroupKey, ListenerGroup, ListenerOptions, WatcherChain};
pub use providers::{Codec, PayloadCodec};
pub use provisioner::{provision, EntryError, ProvisionPlan, ProvisionReport, WatcherHost};
pub use response::{WebhookRequest, WebhookResponse};
pub use settings::{NotifyPolicy, Provider, WatcherSettings};
pub use tls::{SearchScopes, TlsError};
pub use watcher::{HandleOutcome, Watcher};
