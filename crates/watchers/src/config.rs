//! Watcher configuration and service settings.

use std::collections::BTreeMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::listener::ListenerOptions;
use crate::tls::SearchScopes;

/// Default port for plain HTTP groups.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default port for HTTPS groups.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default request body limit (5 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Default time allowed for reading and handling one request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// The watcher configuration document.
///
/// ```yaml
/// disabledPorts: [8081]
/// watchers:
///   "8080":
///     - github
///     - provider: gitlab
///       secret: t0k3n
///   "":
///     provider: bitbucket
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    /// Run no watchers at all
    #[serde(default)]
    pub disable_all: Option<bool>,
    /// Ports never to bind (a single port or a list)
    #[serde(default)]
    pub disabled_ports: Option<Value>,
    /// Only bind these ports (a single port or a list)
    #[serde(default)]
    pub enabled_ports: Option<Value>,
    /// Watcher settings keyed by port label
    #[serde(default)]
    pub watchers: BTreeMap<String, Value>,
}

impl NotifyConfig {
    /// Load a configuration file. `.yaml`/`.yml` files are read as YAML,
    /// anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: display.clone(),
            source: e,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::from_yaml(&contents).map_err(|message| ConfigError::Parse {
                path: display,
                message,
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        }
    }

    fn from_yaml(contents: &str) -> Result<Self, String> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Whether every watcher is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disable_all.unwrap_or(false)
    }

    /// Ports to skip. `None` means no port is denied.
    #[must_use]
    pub fn denied_ports(&self) -> Option<Vec<u16>> {
        parse_ports(self.disabled_ports.as_ref())
    }

    /// Ports to allow. `None` means every port is allowed.
    #[must_use]
    pub fn allowed_ports(&self) -> Option<Vec<u16>> {
        parse_ports(self.enabled_ports.as_ref())
    }
}

/// Coerce a free-form port list.
///
/// Accepts a single value or a list; numbers and numeric strings are kept,
/// everything else is dropped. An absent or `null` list yields `None`,
/// which is distinct from an empty list.
#[must_use]
pub fn parse_ports(value: Option<&Value>) -> Option<Vec<u16>> {
    let values: Vec<&Value> = match value? {
        Value::Null => return None,
        Value::Array(values) => values.iter().collect(),
        single => vec![single],
    };

    Some(
        values
            .into_iter()
            .filter_map(coerce_integer)
            .filter_map(|p| u16::try_from(p).ok())
            .collect(),
    )
}

#[allow(clippy::cast_possible_truncation)]
fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

/// The integer at the start of `text`: an optional sign followed by digits.
///
/// Whatever follows the digits is ignored, so `"8080abc"` and `"8080.5"`
/// both read as 8080. Text that does not start with a digit has no value.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    let sign = usize::from(text.starts_with(['-', '+']));
    let end = text[sign..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(text.len(), |i| i + sign);
    if end == sign {
        return None;
    }

    let overflow = if text.starts_with('-') { i64::MIN } else { i64::MAX };
    Some(text[..end].parse().unwrap_or(overflow))
}

/// Resolve the port of a watcher entry from its label.
///
/// The label's leading integer is the port. Labels without one fall back to
/// 443 for secure watchers and 80 otherwise; ports outside 1-65535 are
/// rejected.
pub fn resolve_port(label: &str, secure: bool) -> Result<u16, ConfigError> {
    let label = label.trim();
    match leading_integer(label) {
        Some(port) => u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::InvalidPort(label.to_string())),
        None if secure => Ok(DEFAULT_HTTPS_PORT),
        None => Ok(DEFAULT_HTTP_PORT),
    }
}

/// Runtime settings of the service, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the watcher configuration file.
    pub config_path: Option<PathBuf>,
    /// Address every listener group binds to.
    pub bind_address: IpAddr,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
    /// Time allowed for reading and handling one request.
    pub request_timeout: Duration,
    /// Extra directory searched for TLS files.
    pub ssl_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_path: env::var("GIT_NOTIFY_CONFIG")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            bind_address: env::var("GIT_NOTIFY_BIND_ADDRESS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            max_body_bytes: env::var("GIT_NOTIFY_MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            request_timeout: Duration::from_secs(
                env::var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            ssl_dir: env::var("GIT_NOTIFY_SSL_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

impl ServiceConfig {
    /// Listener options derived from these settings.
    #[must_use]
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            bind_address: self.bind_address,
            max_body_bytes: self.max_body_bytes,
            request_timeout: self.request_timeout,
            scopes: SearchScopes::with_default(self.ssl_dir.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports(None), None);
        assert_eq!(parse_ports(Some(&Value::Null)), None);
        assert_eq!(parse_ports(Some(&json!(9000))), Some(vec![9000]));
        assert_eq!(
            parse_ports(Some(&json!([8080, " 8081 ", "http", null, 70000]))),
            Some(vec![8080, 8081])
        );
        assert_eq!(parse_ports(Some(&json!([]))), Some(vec![]));
    }

    #[test]
    fn test_resolve_port() {
        assert_eq!(resolve_port("8080", false).unwrap(), 8080);
        assert_eq!(resolve_port(" 8443 ", true).unwrap(), 8443);
        assert_eq!(resolve_port("", false).unwrap(), 80);
        assert_eq!(resolve_port("", true).unwrap(), 443);
        assert_eq!(resolve_port("default", true).unwrap(), 443);
        assert!(matches!(
            resolve_port("70000", false),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(resolve_port("0", false), Err(ConfigError::InvalidPort(_))));
        assert!(matches!(resolve_port("-80", false), Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_port_label_uses_leading_digits() {
        assert_eq!(resolve_port("8080abc", false).unwrap(), 8080);
        assert_eq!(resolve_port("8080.5", true).unwrap(), 8080);
        assert_eq!(resolve_port("+9000", false).unwrap(), 9000);
        assert_eq!(resolve_port("port8080", false).unwrap(), 80);
        assert_eq!(resolve_port("-", true).unwrap(), 443);
        assert!(matches!(
            resolve_port("99999999999999999999", false),
            Err(ConfigError::InvalidPort(_))
        ));
        assert_eq!(
            parse_ports(Some(&json!(["9001/tcp", 9002.7]))),
            Some(vec![9001, 9002])
        );
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: NotifyConfig = serde_json::from_value(json!({
            "disableAll": false,
            "disabledPorts": [9000],
            "watchers": { "8080": ["github", null] }
        }))
        .unwrap();

        assert!(!config.is_disabled());
        assert_eq!(config.denied_ports(), Some(vec![9000]));
        assert_eq!(config.allowed_ports(), None);
        assert_eq!(config.watchers["8080"], json!(["github", null]));
    }

    #[test]
    fn test_load_yaml_and_json() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            yaml,
            "enabledPorts: 8080\nwatchers:\n  \"8080\":\n    provider: gitea\n    secret: abc"
        )
        .unwrap();
        let config = NotifyConfig::load(yaml.path()).unwrap();
        assert_eq!(config.allowed_ports(), Some(vec![8080]));
        assert_eq!(config.watchers["8080"]["provider"], json!("gitea"));

        let mut json_file = NamedTempFile::new().unwrap();
        write!(json_file, r#"{{ "disableAll": true }}"#).unwrap();
        assert!(NotifyConfig::load(json_file.path()).unwrap().is_disabled());
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            NotifyConfig::load("/nonexistent/git-notify.json"),
            Err(ConfigError::Read { .. })
        ));

        let mut broken = NamedTempFile::new().unwrap();
        write!(broken, "{{ not json").unwrap();
        assert!(matches!(
            NotifyConfig::load(broken.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_service_config_defaults() {
        env::remove_var("GIT_NOTIFY_CONFIG");
        env::remove_var("GIT_NOTIFY_BIND_ADDRESS");
        env::remove_var("GIT_NOTIFY_MAX_BODY_BYTES");
        env::remove_var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS");
        env::remove_var("GIT_NOTIFY_SSL_DIR");

        let config = ServiceConfig::default();
        assert!(config.config_path.is_none());
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.ssl_dir.is_none());
    }

    #[test]
    #[serial]
    fn test_service_config_from_env() {
        env::set_var("GIT_NOTIFY_CONFIG", "/etc/git-notify.yaml");
        env::set_var("GIT_NOTIFY_BIND_ADDRESS", "127.0.0.1");
        env::set_var("GIT_NOTIFY_MAX_BODY_BYTES", "1024");
        env::set_var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS", "5");

        let config = ServiceConfig::default();
        assert_eq!(
            config.config_path.as_deref(),
            Some(Path::new("/etc/git-notify.yaml"))
        );
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(5));

        env::remove_var("GIT_NOTIFY_CONFIG");
        env::remove_var("GIT_NOTIFY_BIND_ADDRESS");
        env::remove_var("GIT_NOTIFY_MAX_BODY_BYTES");
        env::remove_var("GIT_NOTIFY_REQUEST_TIMEOUT_SECS");
    }
}
