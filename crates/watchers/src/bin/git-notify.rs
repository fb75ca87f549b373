//! git-notify service binary.
//!
//! Runs the configured webhook watchers and presents their notifications.
//! Send `SIGHUP` to reload the watcher configuration.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notify::Notifier;
use watchers::{NotifyConfig, ServiceConfig, WatcherHost};

const DEFAULT_LOG_FILTER: &str = "git_notify=info,watchers=info,notify=info";

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Listen for git provider webhooks and turn them into notifications.
#[derive(Parser)]
#[command(name = "git-notify")]
#[command(about = "Git provider webhook notifications")]
#[command(version)]
struct Cli {
    /// Watcher configuration file (JSON or YAML)
    #[arg(short, long, env = "GIT_NOTIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Address the listeners bind to
    #[arg(long, env = "GIT_NOTIFY_BIND_ADDRESS")]
    bind_address: Option<IpAddr>,

    /// Request body limit in bytes
    #[arg(long, env = "GIT_NOTIFY_MAX_BODY_BYTES")]
    max_body_bytes: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, env = "GIT_NOTIFY_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Extra directory searched for TLS files
    #[arg(long, env = "GIT_NOTIFY_SSL_DIR")]
    ssl_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags (or their environment variables) over the built-in defaults.
    fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        if let Some(path) = &self.config {
            config.config_path = Some(path.clone());
        }
        if let Some(address) = self.bind_address {
            config.bind_address = address;
        }
        if let Some(bytes) = self.max_body_bytes {
            config.max_body_bytes = bytes;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.ssl_dir {
            config.ssl_dir = Some(dir.clone());
        }
        config
    }
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("git_notify=debug,watchers=debug,notify=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    info!("Starting git-notify...");

    let service = cli.service_config();
    let config_path = service
        .config_path
        .clone()
        .context("No watcher configuration given; pass --config or set GIT_NOTIFY_CONFIG")?;
    let config = NotifyConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let (sender, receiver) = notify::channel();
    let notifier_task = tokio::spawn(Notifier::from_env().run(receiver));

    let mut host = WatcherHost::new(service.listener_options(), sender);
    let report = host.reprovision(&config).await;
    if report.started.is_empty() {
        warn!("No listener group is running");
    }
    for key in &report.started {
        info!(group = %key, "Listening");
    }

    let mut reload = ReloadSignal::new()?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            () = reload.recv() => reload_config(&mut host, &config_path).await,
        }
    }

    info!("Shutting down git-notify...");
    host.shutdown().await;
    drop(host);
    notifier_task.await.context("Notifier task failed")?;

    Ok(())
}

async fn reload_config(host: &mut WatcherHost, path: &Path) {
    info!(path = %path.display(), "Reloading watcher configuration");
    match NotifyConfig::load(path) {
        Ok(config) => {
            let report = host.reprovision(&config).await;
            info!(
                running = report.started.len(),
                failed = report.failed.len(),
                "Configuration reloaded"
            );
        }
        Err(e) => error!(error = %e, "Reload failed; keeping the current watchers"),
    }
}

#[cfg(unix)]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        Ok(Self(hangup))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    #[serial]
    fn test_flags_fall_back_to_environment() {
        std::env::set_var("GIT_NOTIFY_CONFIG", "/etc/git-notify.yaml");
        std::env::set_var("GIT_NOTIFY_MAX_BODY_BYTES", "1024");

        let cli = Cli::try_parse_from(["git-notify", "--max-body-bytes", "2048"]).unwrap();
        let service = cli.service_config();

        std::env::remove_var("GIT_NOTIFY_CONFIG");
        std::env::remove_var("GIT_NOTIFY_MAX_BODY_BYTES");

        assert_eq!(
            service.config_path.as_deref(),
            Some(Path::new("/etc/git-notify.yaml"))
        );
        assert_eq!(service.max_body_bytes, 2048);
    }

    #[test]
    #[serial]
    fn test_invalid_environment_value_is_rejected() {
        std::env::set_var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS", "soon");
        let result = Cli::try_parse_from(["git-notify"]);
        std::env::remove_var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS");

        assert!(result.is_err());
    }
}
