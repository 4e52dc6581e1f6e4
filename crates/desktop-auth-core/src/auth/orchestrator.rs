use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::callback::{CallbackPipeline, LoginCompleted};
use super::correlation::short_state;
use super::{
    AccessTokenRefresher, AuthError, BrowserLauncher, Clock, CorrelationStore, HtmlTemplate,
    KnownClients, ListenerConfig, LoginHints, LoginResult, PendingLogin, ProtocolEngine,
    RedirectListener, RefreshPolicy, SystemBrowser, SystemClock,
};
use crate::config::AuthConfig;

/// Coordinates browser logins: prepares requests, correlates callbacks, and
/// hands out refreshers bound to the same protocol engine.
pub struct LoginOrchestrator {
    config: AuthConfig,
    engine: Arc<dyn ProtocolEngine>,
    pipeline: Arc<CallbackPipeline>,
    listener: RedirectListener,
    browser: Arc<dyn BrowserLauncher>,
    clock: Arc<dyn Clock>,
    disposed: AtomicBool,
    closed: CancellationToken,
}

impl LoginOrchestrator {
    /// Validate `config` and bind the redirect listener.
    pub async fn bind(
        config: AuthConfig,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Result<Self, AuthError> {
        Self::bind_with_clock(config, engine, Arc::new(SystemClock)).await
    }

    pub async fn bind_with_clock(
        config: AuthConfig,
        engine: Arc<dyn ProtocolEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let known_clients = KnownClients::new();
        known_clients.register(config.client_key(), Arc::clone(&engine));
        let pipeline = Arc::new(CallbackPipeline::new(
            CorrelationStore::new(),
            Arc::clone(&engine),
            known_clients,
            Arc::clone(&clock),
        ));
        pipeline.set_allow_unsolicited(config.allow_unsolicited);
        if let Some(app_name) = &config.app_name {
            pipeline.update_template(|template| template.app_name = app_name.clone());
        }

        let listener =
            RedirectListener::bind(&config.listener_config(), Arc::clone(&pipeline)).await?;
        tracing::info!(
            redirect_uri = %listener.redirect_uri(),
            client = %config.client_key(),
            "login orchestrator ready"
        );

        Ok(Self {
            config,
            engine,
            pipeline,
            listener,
            browser: Arc::new(SystemBrowser),
            clock,
            disposed: AtomicBool::new(false),
            closed: CancellationToken::new(),
        })
    }

    /// Replace the system browser, e.g. to print the URL instead.
    pub fn with_browser(mut self, browser: impl BrowserLauncher + 'static) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Effective redirect URI, including the port actually bound.
    pub fn redirect_uri(&self) -> &Url {
        self.listener.redirect_uri()
    }

    pub fn listener_config(&self) -> ListenerConfig {
        let mut config = self.config.listener_config();
        config.port = self.listener.local_addr().port();
        config
    }

    /// Open the browser on a freshly prepared sign-in request.
    pub async fn start_login(&self, hints: LoginHints) -> Result<LoginAttempt, AuthError> {
        self.ensure_active()?;

        let extra = hints.to_extra_params();
        let prepared = self.engine.prepare_login(&extra).await?;
        let state = prepared.state.clone();

        let rx = self.pipeline.expect(PendingLogin {
            state: state.clone(),
            context: prepared.context,
            created_at: self.clock.now(),
            hints,
        });
        tracing::info!(state = %short_state(&state), "login started");

        if let Err(err) = self.browser.open(&prepared.start_url) {
            self.pipeline.withdraw(&state);
            tracing::warn!(
                state = %short_state(&state),
                error = %err,
                "browser launch failed; login withdrawn"
            );
            return Err(err);
        }

        Ok(LoginAttempt {
            state,
            start_url: prepared.start_url,
            rx,
            closed: self.closed.clone(),
        })
    }

    /// Completion events for every callback, solicited or not.
    pub fn subscribe(&self) -> broadcast::Receiver<LoginCompleted> {
        self.pipeline.subscribe()
    }

    /// Complete a login from a response delivered outside the listener,
    /// such as a custom URI scheme activation.
    pub async fn handle_login_response(&self, raw: &str) -> Result<LoginResult, AuthError> {
        self.ensure_active()?;
        Ok(self.pipeline.handle_raw(raw).await.into_result())
    }

    pub fn pending_logins(&self) -> usize {
        self.pipeline.store().len()
    }

    pub fn refresher(&self) -> AccessTokenRefresher {
        self.refresher_with(Arc::clone(&self.clock), RefreshPolicy::default())
    }

    pub fn refresher_with(
        &self,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> AccessTokenRefresher {
        AccessTokenRefresher::with_clock(Arc::clone(&self.engine), clock, policy)
    }

    pub fn set_allow_unsolicited(&self, allow: bool) {
        self.pipeline.set_allow_unsolicited(allow);
    }

    /// Use `content` (with `{{title}}` and `{{body}}` placeholders) for callback pages.
    pub fn set_html_template(&self, content: impl Into<String>) {
        let content = content.into();
        self.pipeline
            .update_template(|template| template.content = Some(content));
    }

    pub fn set_app_name(&self, app_name: impl Into<String>) {
        let app_name = app_name.into();
        self.pipeline
            .update_template(|template| template.app_name = app_name);
    }

    pub fn html_template(&self) -> HtmlTemplate {
        self.pipeline.template()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the listener socket. Outstanding [`LoginAttempt`]s resolve
    /// with [`AuthError::Disposed`].
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        self.listener.shutdown().await;
        tracing::info!("login orchestrator shut down");
    }

    fn ensure_active(&self) -> Result<(), AuthError> {
        if self.is_disposed() {
            return Err(AuthError::Disposed);
        }
        Ok(())
    }
}

impl Drop for LoginOrchestrator {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// A login in progress, tagged with its correlation id.
#[derive(Debug)]
pub struct LoginAttempt {
    state: String,
    start_url: Url,
    rx: oneshot::Receiver<LoginResult>,
    closed: CancellationToken,
}

impl LoginAttempt {
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Wait for the callback carrying this attempt's correlation id.
    ///
    /// The result is delivered to this handle alone, so other callbacks
    /// arriving meanwhile cannot displace it. Wrap in `tokio::time::timeout`
    /// to bound the wait.
    pub async fn wait(self) -> Result<LoginResult, AuthError> {
        let LoginAttempt { rx, closed, .. } = self;
        tokio::select! {
            biased;
            result = rx => result.map_err(|_| AuthError::ListenerClosed),
            _ = closed.cancelled() => Err(AuthError::Disposed),
        }
    }
}
