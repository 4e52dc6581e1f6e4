use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, Method};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::callback::{CallbackPipeline, CallbackRequest};
use super::AuthError;
use crate::sync_ext::MutexExt;

/// Address the redirect listener binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    /// Callback path, starting with `/`.
    pub path: String,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    fn validate_path(&self) -> Result<(), AuthError> {
        let path = self.path.as_str();
        if !path.starts_with('/') || path.contains(['?', '#', ' ']) {
            return Err(AuthError::InvalidCallbackPath(self.path.clone()));
        }
        Ok(())
    }
}

/// Loopback HTTP endpoint receiving identity-provider redirects.
///
/// Owns the bound socket. It is released by [`shutdown`](Self::shutdown) or
/// when the listener is dropped.
pub struct RedirectListener {
    local_addr: SocketAddr,
    redirect_uri: Url,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedirectListener {
    /// Bind the endpoint and start serving callbacks through `pipeline`.
    pub async fn bind(
        config: &ListenerConfig,
        pipeline: Arc<CallbackPipeline>,
    ) -> Result<Self, AuthError> {
        config.validate_path()?;
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|err| AuthError::bind(addr.clone(), err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| AuthError::bind(addr, err))?;
        let redirect_uri = Url::parse(&format!(
            "http://{}:{}{}",
            config.host,
            local_addr.port(),
            config.path
        ))?;

        let app = callback_router(&config.path, pipeline);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                signal.cancelled().await;
                tracing::info!("redirect listener shutting down");
            });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "redirect listener terminated");
            }
        });

        tracing::info!(%local_addr, path = %config.path, "redirect listener bound");
        Ok(Self {
            local_addr,
            redirect_uri,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Redirect URI to register with the identity provider.
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop accepting callbacks and wait until the socket is released.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock_or_recover().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "redirect listener task failed");
            }
        }
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn callback_router(path: &str, pipeline: Arc<CallbackPipeline>) -> Router {
    let mut router = Router::new().route(path, any(receive_callback));
    let twin = match path.strip_suffix('/') {
        Some(trimmed) => trimmed.to_owned(),
        None => format!("{path}/"),
    };
    if !twin.is_empty() && twin != path {
        router = router.route(&twin, any(receive_callback));
    }
    router.with_state(pipeline)
}

async fn receive_callback(
    State(pipeline): State<Arc<CallbackPipeline>>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let request = CallbackRequest {
        method: method.as_str(),
        content_type,
        query: query.as_deref(),
        body: &body,
    };
    let reply = pipeline.handle_request(request).await;
    (reply.status, Html(reply.page)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        CorrelationStore, EngineContext, KnownClients, LoginHints, PendingLogin, SystemClock,
    };
    use crate::test_support::{http_get as get, send_http, FakeEngine};
    use chrono::Utc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    const PATH: &str = "/signin-oidc/";

    async fn start(engine: Arc<FakeEngine>) -> (Arc<CallbackPipeline>, RedirectListener) {
        let pipeline = Arc::new(CallbackPipeline::new(
            CorrelationStore::new(),
            engine,
            KnownClients::new(),
            Arc::new(SystemClock),
        ));
        let listener = RedirectListener::bind(
            &ListenerConfig::new("127.0.0.1", 0, PATH),
            pipeline.clone(),
        )
        .await
        .expect("listener binds");
        (pipeline, listener)
    }

    fn put(pipeline: &CallbackPipeline, state: &str) {
        pipeline.store().put(PendingLogin {
            state: state.into(),
            context: EngineContext::new(()),
            created_at: Utc::now(),
            hints: LoginHints::default(),
        });
    }

    async fn post(addr: SocketAddr, content_type: &str, body: &str) -> (u16, String) {
        send_http(
            addr,
            &format!(
                "POST {PATH} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: {content_type}\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ),
        )
        .await
    }

    #[tokio::test]
    async fn successful_get_renders_success_page() {
        let engine = Arc::new(FakeEngine::new());
        engine.push_exchange(Ok(engine.success("AT1")));
        let (pipeline, listener) = start(engine.clone()).await;
        put(&pipeline, "abc");
        let mut events = pipeline.subscribe();

        let (status, body) = get(listener.local_addr(), "/signin-oidc/?code=xyz&state=abc").await;

        assert_eq!(status, 200);
        assert!(body.contains("Sign-in Success"));
        let event = events.recv().await.unwrap();
        assert_eq!(event.state.as_deref(), Some("abc"));
        assert_eq!(
            event.result.success().map(|s| s.tokens.access_token.clone()),
            Some("AT1".to_string())
        );
        assert!(events.try_recv().is_err());
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn provider_error_returns_bad_request() {
        let (pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        put(&pipeline, "abc");
        let mut events = pipeline.subscribe();

        let (status, body) = get(
            listener.local_addr(),
            "/signin-oidc/?error=access_denied&error_description=user+cancelled&state=abc",
        )
        .await;

        assert_eq!(status, 400);
        assert!(body.contains("access_denied - user cancelled"));
        let event = events.recv().await.unwrap();
        assert_eq!(
            event.result,
            crate::auth::LoginResult::error("access_denied", "user cancelled")
        );
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_state_returns_bad_request() {
        let (_pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let (status, body) = get(listener.local_addr(), "/signin-oidc?code=xyz&state=never").await;
        assert_eq!(status, 400);
        assert!(body.contains("cannot be verified"));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn json_post_is_unsupported_media_type() {
        let (_pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let (status, _) = post(
            listener.local_addr(),
            "application/json",
            r#"{"code":"xyz","state":"abc"}"#,
        )
        .await;
        assert_eq!(status, 415);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn empty_form_post_is_bad_request() {
        let (pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let mut events = pipeline.subscribe();
        let (status, body) = post(
            listener.local_addr(),
            "application/x-www-form-urlencoded",
            "",
        )
        .await;
        assert_eq!(status, 400);
        assert!(body.contains("No data received."));
        assert!(events.recv().await.unwrap().result.is_error());
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn form_post_completes_login() {
        let engine = Arc::new(FakeEngine::new());
        engine.push_exchange(Ok(engine.success("AT1")));
        let (pipeline, listener) = start(engine.clone()).await;
        put(&pipeline, "abc");
        let (status, _) = post(
            listener.local_addr(),
            "application/x-www-form-urlencoded",
            "code=xyz&state=abc",
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(engine.exchanges(), vec!["code=xyz&state=abc".to_string()]);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_method_is_not_allowed() {
        let (_pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let addr = listener.local_addr();
        let (status, _) = send_http(
            addr,
            &format!("DELETE {PATH} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"),
        )
        .await;
        assert_eq!(status, 405);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn other_paths_are_not_callbacks() {
        let (pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let mut events = pipeline.subscribe();
        let (status, _) = get(listener.local_addr(), "/favicon.ico").await;
        assert_eq!(status, 404);
        assert!(events.try_recv().is_err());
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_connection_does_not_block_others() {
        let (_pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let addr = listener.local_addr();
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        let partial = "POST /signin-oidc/ HTTP/1.1\r\nHost: x\r\n\
                       Content-Type: application/x-www-form-urlencoded\r\n\
                       Content-Length: 100\r\n\r\ncode=";
        stalled.write_all(partial.as_bytes()).await.unwrap();

        let (status, _) = get(addr, "/signin-oidc/?code=xyz&state=other").await;
        assert_eq!(status, 400);
        drop(stalled);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let (pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let port = listener.local_addr().port();
        let err = RedirectListener::bind(&ListenerConfig::new("127.0.0.1", port, PATH), pipeline)
            .await
            .err()
            .expect("second bind fails");
        assert!(matches!(err, AuthError::Bind { .. }));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_path_is_rejected() {
        let (pipeline, _listener) = start(Arc::new(FakeEngine::new())).await;
        let err = RedirectListener::bind(
            &ListenerConfig::new("127.0.0.1", 0, "signin?x=1"),
            pipeline,
        )
        .await
        .err()
        .expect("invalid path");
        assert!(matches!(err, AuthError::InvalidCallbackPath(_)));
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let (pipeline, listener) = start(Arc::new(FakeEngine::new())).await;
        let port = listener.local_addr().port();
        assert_eq!(listener.redirect_uri().port(), Some(port));
        listener.shutdown().await;
        assert!(!listener.is_running());

        let rebound =
            RedirectListener::bind(&ListenerConfig::new("127.0.0.1", port, PATH), pipeline)
                .await
                .expect("port released");
        rebound.shutdown().await;
    }
}
