//! Error types for webhook watchers, listener groups, and provisioning.

use axum::http::StatusCode;
use thiserror::Error;

use crate::tls::TlsError;

/// Problems with a single watcher configuration entry.
///
/// Reported per entry; the rest of a reload continues.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The provider name is not one of the supported providers
    #[error("git provider '{0}' is not supported")]
    UnsupportedProvider(String),

    /// A port label resolved to a value outside 1-65535
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// The settings object does not have the expected shape
    #[error("invalid watcher settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Why a watcher rejected or failed a request.
///
/// Every variant maps onto the HTTP status written back to the sender.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Only `POST` is accepted
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The request carried no headers at all
    #[error("request has no headers")]
    MissingHeaders,

    /// Content type is not `application/json`
    #[error("content type must be application/json")]
    UnsupportedContentType,

    /// Body is not a JSON object
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Signature or secret did not match
    #[error("request could not be authenticated")]
    NotAuthenticated,

    /// Any other fault while handling the request
    #[error("{0}")]
    Internal(String),
}

impl WatcherError {
    /// HTTP status for this error.
    ///
    /// `MissingHeaders` answers 402 and `NotAuthenticated` answers 404 so
    /// that a wrong secret looks like an unknown route.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingHeaders => StatusCode::PAYMENT_REQUIRED,
            Self::UnsupportedContentType => StatusCode::NOT_ACCEPTABLE,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures starting a listener group.
///
/// Reported per group; the group is left out of the running set.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The socket could not be bound
    #[error("could not bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    /// TLS material could not be loaded
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// A secure group has no certificate configured
    #[error("secure listener on port {0} has no certificate configured")]
    MissingCertificate(u16),

    /// A secure group has no private key configured
    #[error("secure listener on port {0} has no private key configured")]
    MissingKey(u16),
}

/// Errors writing the shared response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    /// Another chain participant already sent the status line
    #[error("response headers already sent")]
    HeadersAlreadySent,
}
