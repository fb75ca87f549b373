//! TLS material for secure listener groups.
//!
//! Certificate, key, and CA references are file paths. Absolute paths are
//! used as given; relative paths are looked up in each search scope in
//! order (by default `~/.ssl`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

use crate::settings::{TlsFile, WatcherSettings};

/// Errors loading TLS material.
///
/// Every variant names the file reference as configured, not the resolved
/// path, so the message matches what the user wrote.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS file '{0}' not found in any search scope")]
    NotFound(String),

    #[error("could not read TLS file '{file}': {source}")]
    Read {
        file: String,
        source: std::io::Error,
    },

    #[error("TLS file '{0}' holds no PEM certificate")]
    NoCertificates(String),

    #[error("TLS file '{0}' holds no PEM private key")]
    NoPrivateKey(String),

    #[error("invalid TLS material: {0}")]
    Config(#[from] rustls::Error),
}

/// Directories searched for relative TLS file references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchScopes {
    dirs: Vec<PathBuf>,
}

impl SearchScopes {
    /// The default scopes: `extra` (if any) followed by `~/.ssl`.
    ///
    /// A relative `extra` directory is taken relative to the home directory.
    #[must_use]
    pub fn with_default(extra: Option<&Path>) -> Self {
        let home = dirs::home_dir();
        let mut dirs = Vec::new();

        if let Some(extra) = extra.filter(|p| !p.as_os_str().is_empty()) {
            if extra.is_absolute() {
                dirs.push(extra.to_path_buf());
            } else if let Some(home) = &home {
                dirs.push(home.join(extra));
            }
        }
        if let Some(home) = home {
            dirs.push(home.join(".ssl"));
        }

        Self { dirs }
    }

    /// Exactly the given directories.
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// The directories searched, in order.
    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Resolve a file reference to an existing file.
    pub fn resolve(&self, file: &str) -> Result<PathBuf, TlsError> {
        let path = Path::new(file);
        if path.is_absolute() {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(TlsError::NotFound(file.to_string()))
            };
        }

        self.dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| TlsError::NotFound(file.to_string()))
    }

    /// Every PEM certificate in the referenced file, in file order.
    pub fn certificates(&self, file: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let pem = self.read(file)?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| read_error(file, source))?;

        if certs.is_empty() {
            Err(TlsError::NoCertificates(file.to_string()))
        } else {
            Ok(certs)
        }
    }

    /// The first PKCS#1, PKCS#8 or SEC1 private key in the referenced file.
    pub fn private_key(&self, file: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
        let pem = self.read(file)?;
        rustls_pemfile::private_key(&mut pem.as_slice())
            .map_err(|source| read_error(file, source))?
            .ok_or_else(|| TlsError::NoPrivateKey(file.to_string()))
    }

    fn read(&self, file: &str) -> Result<Vec<u8>, TlsError> {
        let path = self.resolve(file)?;
        fs::read(path).map_err(|source| read_error(file, source))
    }
}

fn read_error(file: &str, source: std::io::Error) -> TlsError {
    TlsError::Read {
        file: file.to_string(),
        source,
    }
}

/// The TLS file references of one listener group.
///
/// Across the group's watchers, the last non-empty value of each reference
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSources {
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

impl TlsSources {
    /// Collect the references from a group's watcher settings.
    pub fn collect<'a>(settings: impl IntoIterator<Item = &'a WatcherSettings>) -> Self {
        let mut sources = Self::default();
        for s in settings {
            if let Some(ca) = s.tls_file(TlsFile::Ca) {
                sources.ca = Some(ca.to_string());
            }
            if let Some(cert) = s.tls_file(TlsFile::Cert) {
                sources.cert = Some(cert.to_string());
            }
            if let Some(key) = s.tls_file(TlsFile::Key) {
                sources.key = Some(key.to_string());
            }
        }
        sources
    }
}

/// Build a `rustls::ServerConfig` for a secure listener group.
///
/// CA certificates, when given, are appended to the served chain.
pub fn build_server_config(
    scopes: &SearchScopes,
    cert: &str,
    key: &str,
    ca: Option<&str>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let mut chain = scopes.certificates(cert)?;
    let key = scopes.private_key(key)?;
    if let Some(ca) = ca {
        chain.extend(scopes.certificates(ca)?);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_relative_in_scope_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(second.path().join("server.crt"), "second").unwrap();

        let scopes = SearchScopes::new(vec![first.path().into(), second.path().into()]);
        assert_eq!(
            scopes.resolve("server.crt").unwrap(),
            second.path().join("server.crt")
        );

        fs::write(first.path().join("server.crt"), "first").unwrap();
        assert_eq!(
            scopes.resolve("server.crt").unwrap(),
            first.path().join("server.crt")
        );
    }

    #[test]
    fn test_resolve_absolute_and_missing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("server.key");
        fs::write(&file, "key").unwrap();

        let scopes = SearchScopes::new(Vec::new());
        assert_eq!(scopes.resolve(file.to_str().unwrap()).unwrap(), file);
        assert!(matches!(
            scopes.resolve("nowhere.pem"),
            Err(TlsError::NotFound(name)) if name == "nowhere.pem"
        ));
        assert!(matches!(
            scopes.resolve(dir.path().to_str().unwrap()),
            Err(TlsError::NotFound(_))
        ));
    }

    #[test]
    fn test_default_scopes_end_with_home_ssl() {
        let scopes = SearchScopes::with_default(Some(Path::new("/etc/git-notify")));
        assert_eq!(scopes.dirs()[0], PathBuf::from("/etc/git-notify"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(scopes.dirs().last().unwrap(), &home.join(".ssl"));
        }
    }

    #[test]
    fn test_sources_last_value_wins() {
        let first = WatcherSettings {
            cert: Some("a.crt".to_string()),
            key: Some("a.key".to_string()),
            ..WatcherSettings::default()
        };
        let second = WatcherSettings {
            cert: Some("b.crt".to_string()),
            key: Some("  ".to_string()),
            ..WatcherSettings::default()
        };

        let sources = TlsSources::collect([&first, &second]);
        assert_eq!(sources.cert.as_deref(), Some("b.crt"));
        assert_eq!(sources.key.as_deref(), Some("a.key"));
        assert!(sources.ca.is_none());
    }

    #[test]
    fn test_empty_pem_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.pem"), "").unwrap();
        let scopes = SearchScopes::new(vec![dir.path().into()]);

        assert!(matches!(
            scopes.certificates("empty.pem"),
            Err(TlsError::NoCertificates(file)) if file == "empty.pem"
        ));
        let err = scopes.private_key("empty.pem").unwrap_err();
        assert_eq!(err.to_string(), "TLS file 'empty.pem' holds no PEM private key");
        assert!(matches!(
            scopes.certificates("missing.pem"),
            Err(TlsError::NotFound(_))
        ));
    }

    #[test]
    fn test_bundle_and_ca_certificates() {
        let dir = TempDir::new().unwrap();
        let leaf = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let ca = rcgen::generate_simple_self_signed(vec!["ca.local".to_string()]).unwrap();
        fs::write(
            dir.path().join("bundle.crt"),
            format!("{}{}", leaf.cert.pem(), ca.cert.pem()),
        )
        .unwrap();
        fs::write(dir.path().join("leaf.crt"), leaf.cert.pem()).unwrap();
        fs::write(dir.path().join("ca.crt"), ca.cert.pem()).unwrap();
        fs::write(dir.path().join("leaf.key"), leaf.key_pair.serialize_pem()).unwrap();

        let scopes = SearchScopes::new(vec![dir.path().into()]);
        assert_eq!(scopes.certificates("bundle.crt").unwrap().len(), 2);
        assert!(build_server_config(&scopes, "leaf.crt", "leaf.key", Some("ca.crt")).is_ok());
    }

    #[test]
    fn test_build_server_config_from_generated_cert() {
        let dir = TempDir::new().unwrap();
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        fs::write(dir.path().join("server.crt"), certified.cert.pem()).unwrap();
        fs::write(
            dir.path().join("server.key"),
            certified.key_pair.serialize_pem(),
        )
        .unwrap();

        let scopes = SearchScopes::new(vec![dir.path().into()]);
        let config = build_server_config(&scopes, "server.crt", "server.key", None).unwrap();
        assert_eq!(config.alpn_protocols.len(), 2);
    }
}
