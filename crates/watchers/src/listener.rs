//! Listener groups: one bound socket shared by every watcher configured for
//! the same port and transport security.
//!
//! Each request is read once and handed to every watcher of the group in
//! configured order, one at a time. Watchers share a single response; the
//! first one to write the status line owns it and the group answers
//! `204 No Content` when nobody wrote anything.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::{self, GracefulShutdown};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};

use crate::config::{DEFAULT_MAX_BODY_BYTES, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::ListenerError;
use crate::response::{WebhookRequest, WebhookResponse};
use crate::tls::{build_server_config, SearchScopes, TlsSources};
use crate::watcher::Watcher;

/// Identifies a listener group.
///
/// Groups order secure before plain, then by ascending port, which is the
/// order they are started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub secure: bool,
    pub port: u16,
}

impl GroupKey {
    #[must_use]
    pub const fn new(secure: bool, port: u16) -> Self {
        Self { secure, port }
    }

    /// `https` or `http`.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .secure
            .cmp(&self.secure)
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme(), self.port)
    }
}

/// Settings shared by every listener group.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Address to bind
    pub bind_address: IpAddr,
    /// Request body limit; larger bodies answer 413
    pub max_body_bytes: usize,
    /// Time allowed per request; slower requests answer 408
    pub request_timeout: Duration,
    /// Where relative TLS file references are looked up
    pub scopes: SearchScopes,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            scopes: SearchScopes::with_default(None),
        }
    }
}

/// Watchers of one group, in dispatch order.
pub type WatcherChain = Arc<[Arc<Watcher>]>;

/// A running listener and its watcher chain.
#[derive(Debug)]
pub struct ListenerGroup {
    key: GroupKey,
    local_addr: SocketAddr,
    watchers: WatcherChain,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerGroup {
    /// Load TLS material (secure groups only), bind the socket, start the
    /// watchers, and begin accepting connections.
    pub async fn start(
        key: GroupKey,
        watchers: Vec<Watcher>,
        options: &ListenerOptions,
    ) -> Result<Self, ListenerError> {
        let tls = if key.secure {
            let sources = TlsSources::collect(watchers.iter().map(Watcher::settings));
            let cert = sources
                .cert
                .as_deref()
                .ok_or(ListenerError::MissingCertificate(key.port))?;
            let key_file = sources
                .key
                .as_deref()
                .ok_or(ListenerError::MissingKey(key.port))?;
            let config = build_server_config(&options.scopes, cert, key_file, sources.ca.as_deref())?;
            Some(TlsAcceptor::from(config))
        } else {
            None
        };

        let listener = TcpListener::bind(SocketAddr::new(options.bind_address, key.port))
            .await
            .map_err(|source| ListenerError::Bind {
                port: key.port,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            port: key.port,
            source,
        })?;

        let watchers: WatcherChain = watchers.into_iter().map(Arc::new).collect();
        for watcher in watchers.iter() {
            watcher.start();
        }

        let app = webhook_router(Arc::clone(&watchers), options);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            app,
            tls,
            options.request_timeout,
            shutdown_rx,
        ));

        info!(
            secure = key.secure,
            port = key.port,
            address = %local_addr,
            watchers = watchers.len(),
            "Listener group started"
        );

        Ok(Self {
            key,
            local_addr,
            watchers,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    #[must_use]
    pub const fn key(&self) -> GroupKey {
        self.key
    }

    /// The address the socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The watcher chain, in dispatch order.
    #[must_use]
    pub fn watchers(&self) -> &[Arc<Watcher>] {
        &self.watchers
    }

    /// Close the socket, drain open connections, and dispose every watcher.
    ///
    /// A request in flight is answered before its connection closes. Idle
    /// keep-alive connections are closed right away.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(port = self.key.port, error = %e, "Listener task failed");
            }
        }

        for watcher in self.watchers.iter() {
            watcher.dispose();
        }

        info!(
            secure = self.key.secure,
            port = self.key.port,
            "Listener group stopped"
        );
    }
}

/// The HTTP surface of one listener group.
///
/// Every method and path is dispatched to the watcher chain, behind the
/// body limit and request timeout.
pub fn webhook_router(watchers: WatcherChain, options: &ListenerOptions) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(watchers)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(options.max_body_bytes))
                .layer(TimeoutLayer::new(options.request_timeout))
                .layer(DefaultBodyLimit::disable()),
        )
}

async fn dispatch(
    State(watchers): State<WatcherChain>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = WebhookRequest::new(method, headers, body);
    let mut response = WebhookResponse::new();

    for watcher in watchers.iter() {
        let outcome = watcher.handle(&request, &mut response);
        trace!(watcher = watcher.name(), ?outcome, "Watcher finished");
    }

    response.finish()
}

/// Accept connections until `shutdown` fires, then stop accepting and let
/// open connections finish their current request.
async fn accept_loop(
    listener: TcpListener,
    app: Router,
    tls: Option<TlsAcceptor>,
    drain_timeout: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, remote_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                let app = app.clone();
                let tls = tls.clone();
                let connection = graceful.watcher();

                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, app, connection).await,
                            Err(e) => debug!(remote = %remote_addr, error = %e, "TLS handshake failed"),
                        },
                        None => serve_connection(stream, app, connection).await,
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    if tokio::time::timeout(drain_timeout, graceful.shutdown())
        .await
        .is_err()
    {
        warn!("Connections still open after the drain timeout");
    }
}

async fn serve_connection<S>(stream: S, app: Router, connection: graceful::Watcher)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
        app.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    if let Err(e) = connection.watch(builder.serve_connection(io, service)).await {
        debug!(error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::WatcherSettings;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use serde_json::json;

    fn chain(providers: &[&str]) -> (WatcherChain, notify::NotifyReceiver) {
        let (sender, receiver) = notify::channel();
        let watchers: WatcherChain = providers
            .iter()
            .map(|p| {
                let watcher =
                    Watcher::new(WatcherSettings::for_provider(*p), sender.clone()).unwrap();
                watcher.start();
                Arc::new(watcher)
            })
            .collect();
        (watchers, receiver)
    }

    fn gitea_pull_request() -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/hooks")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-gitea-event", "pull_request")
            .body(Body::from(
                json!({
                    "action": "opened",
                    "pull_request": { "number": 2, "title": "Docs" },
                    "repository": { "full_name": "team/app" }
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[test]
    fn test_group_key_order() {
        let mut keys = vec![
            GroupKey::new(false, 9000),
            GroupKey::new(true, 8443),
            GroupKey::new(false, 80),
            GroupKey::new(true, 443),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                GroupKey::new(true, 443),
                GroupKey::new(true, 8443),
                GroupKey::new(false, 80),
                GroupKey::new(false, 9000),
            ]
        );
        assert_eq!(GroupKey::new(true, 443).to_string(), "https:443");
    }

    #[tokio::test]
    async fn test_every_watcher_sees_the_request() {
        let (watchers, mut rx) = chain(&["gitea", "github", "gitea"]);
        let app = webhook_router(watchers, &ListenerOptions::default());

        let response = app.oneshot(gitea_pull_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.source, "Gitea");
        assert_eq!(second.source, "Gitea");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unaddressed_request_is_no_content() {
        let (watchers, mut rx) = chain(&["gitlab"]);
        let app = webhook_router(watchers, &ListenerOptions::default());

        let response = app.oneshot(gitea_pull_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_first_rejection_owns_the_response() {
        let (watchers, _rx) = chain(&["github", "gitea"]);
        let app = webhook_router(watchers, &ListenerOptions::default());

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header("x-gitea-event", "pull_request")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let (watchers, mut rx) = chain(&["gitea"]);
        let options = ListenerOptions {
            max_body_bytes: 16,
            ..ListenerOptions::default()
        };
        let app = webhook_router(watchers, &options);

        let response = app.oneshot(gitea_pull_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_body_times_out() {
        let (watchers, mut rx) = chain(&["gitea"]);
        let options = ListenerOptions {
            request_timeout: Duration::from_millis(200),
            ..ListenerOptions::default()
        };
        let app = webhook_router(watchers, &options);

        let partial = futures::stream::once(async { Ok::<_, std::io::Error>(Bytes::from("{")) })
            .chain(futures::stream::pending());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "100")
            .header("x-gitea-event", "pull_request")
            .body(Body::from_stream(partial))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_text_plain_is_not_acceptable() {
        let (watchers, _rx) = chain(&["github"]);
        let app = webhook_router(watchers, &ListenerOptions::default());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "text/plain")
            .header("x-github-event", "issues")
            .body(Body::from("hello"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let (sender, _rx) = notify::channel();
        let options = ListenerOptions {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..ListenerOptions::default()
        };

        let first = ListenerGroup::start(
            GroupKey::new(false, 0),
            vec![Watcher::new(WatcherSettings::for_provider("github"), sender.clone()).unwrap()],
            &options,
        )
        .await
        .unwrap();
        let port = first.local_addr().port();
        assert!(first.watchers()[0].is_running());

        let second = ListenerGroup::start(
            GroupKey::new(false, port),
            vec![Watcher::new(WatcherSettings::for_provider("github"), sender).unwrap()],
            &options,
        )
        .await;
        assert!(matches!(second, Err(ListenerError::Bind { port: p, .. }) if p == port));

        let watcher = Arc::clone(&first.watchers()[0]);
        first.shutdown().await;
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_secure_group_requires_certificate() {
        let (sender, _rx) = notify::channel();
        let result = ListenerGroup::start(
            GroupKey::new(true, 0),
            vec![Watcher::new(WatcherSettings::for_provider("github"), sender).unwrap()],
            &ListenerOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(ListenerError::MissingCertificate(0))));
    }
}
