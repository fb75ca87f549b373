//! The request seen by a watcher chain and the response it shares.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::ResponseError;

/// A fully read inbound webhook request.
///
/// The body is read once per request and shared read-only by every
/// watcher in the chain.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Request method
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// Raw body bytes
    pub body: Bytes,
}

impl WebhookRequest {
    /// Create a request.
    #[must_use]
    pub const fn new(method: Method, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            headers,
            body,
        }
    }

    /// Header value, trimmed and lower-cased. Missing or non-UTF-8 values
    /// become an empty string.
    #[must_use]
    pub fn normalized_header(&self, name: &str) -> String {
        self.header(name).trim().to_lowercase()
    }

    /// Raw header value, or an empty string.
    #[must_use]
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Check if the header is present with a non-blank value.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        !self.header(name).trim().is_empty()
    }
}

/// The one response shared by every watcher in a chain.
///
/// The first participant to write the status line owns the response; later
/// writes fail with [`ResponseError::HeadersAlreadySent`].
#[derive(Debug, Default)]
pub struct WebhookResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl WebhookResponse {
    /// Create an unsent response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a status line has been written.
    #[must_use]
    pub const fn headers_sent(&self) -> bool {
        self.status.is_some()
    }

    /// The written status, if any.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Write the status line.
    pub fn write_head(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        if self.headers_sent() {
            return Err(ResponseError::HeadersAlreadySent);
        }
        self.status = Some(status);
        Ok(())
    }

    /// Write the status line with a JSON content type advertised.
    pub fn write_head_json(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.write_head(status)?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(())
    }

    /// Write the status line and a plain-text body.
    pub fn write_text(&mut self, status: StatusCode, text: &str) -> Result<(), ResponseError> {
        self.write_head(status)?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body.extend_from_slice(text.as_bytes());
        Ok(())
    }

    /// Close the response. Unwritten responses answer `204 No Content`.
    #[must_use]
    pub fn finish(self) -> Response {
        let status = self.status.unwrap_or(StatusCode::NO_CONTENT);
        let mut response = if status == StatusCode::NO_CONTENT {
            Response::new(Body::empty())
        } else {
            Response::new(Body::from(self.body))
        };
        *response.status_mut() = status;
        response.headers_mut().extend(self.headers);
        response
    }
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        self.finish()
    }
}
