//! Classification of redirect callbacks into login outcomes.
//!
//! Shared by the HTTP listener and the raw-response entry point so both follow
//! the same precedence:
//!
//! 1. unsupported method (405)
//! 2. unsupported content type (415)
//! 3. no data (400)
//! 4. provider error in the response (400)
//! 5. correlation lookup and code exchange (200 / 400)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};

use super::correlation::short_state;
use super::response::replace_state;
use super::{
    AuthorizeResponse, Clock, CorrelationStore, EngineError, ExtraParams, HtmlTemplate,
    KnownClients, LoginHints, LoginResult, LoginSuccess, PendingLogin, ProtocolEngine,
};
use crate::sync_ext::RwLockExt;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const EVENT_CAPACITY: usize = 64;

pub(crate) const BAD_REQUEST_CODE: &str = "bad_request";
pub(crate) const TRANSPORT_FAILURE_CODE: &str = "transport_failure";
pub(crate) const NO_DATA_DESCRIPTION: &str = "No data received.";
pub(crate) const UNMATCHED_DESCRIPTION: &str = "This auth response cannot be verified.";

/// How a single redirect callback resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Success(LoginSuccess),
    ProtocolError { code: String, description: String },
    /// No pending login matched the response.
    Unmatched,
    /// The request never reached the protocol engine.
    Malformed(String),
}

impl CallbackOutcome {
    fn protocol_error(code: impl Into<String>, description: impl Into<String>) -> Self {
        CallbackOutcome::ProtocolError {
            code: code.into(),
            description: description.into(),
        }
    }

    /// Error code and description rendered for non-success outcomes.
    pub fn error_parts(&self) -> Option<(&str, &str)> {
        match self {
            CallbackOutcome::Success(_) => None,
            CallbackOutcome::ProtocolError { code, description } => Some((code, description)),
            CallbackOutcome::Unmatched => Some((BAD_REQUEST_CODE, UNMATCHED_DESCRIPTION)),
            CallbackOutcome::Malformed(reason) => Some((BAD_REQUEST_CODE, reason)),
        }
    }

    pub fn into_result(self) -> LoginResult {
        match self {
            CallbackOutcome::Success(success) => LoginResult::Success(success),
            CallbackOutcome::ProtocolError { code, description } => {
                LoginResult::error(code, description)
            }
            CallbackOutcome::Unmatched => {
                LoginResult::error(BAD_REQUEST_CODE, UNMATCHED_DESCRIPTION)
            }
            CallbackOutcome::Malformed(reason) => LoginResult::error(BAD_REQUEST_CODE, reason),
        }
    }
}

impl From<EngineError> for CallbackOutcome {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Protocol { code, description } => {
                CallbackOutcome::ProtocolError { code, description }
            }
            EngineError::Transport(message) => {
                CallbackOutcome::protocol_error(TRANSPORT_FAILURE_CODE, message)
            }
        }
    }
}

/// Notification published once for every handled callback.
#[derive(Debug, Clone)]
pub struct LoginCompleted {
    /// Correlation id from the response, when one could be read.
    pub state: Option<String>,
    pub result: LoginResult,
}

/// HTTP-shaped view of an incoming callback request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallbackRequest<'a> {
    pub method: &'a str,
    pub content_type: Option<&'a str>,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

/// Response to render for a callback request.
#[derive(Debug, Clone)]
pub(crate) struct CallbackReply {
    pub status: StatusCode,
    pub page: String,
    pub outcome: CallbackOutcome,
}

/// How a response was resolved before it is rendered and published.
struct Resolution {
    state: Option<String>,
    status: StatusCode,
    outcome: CallbackOutcome,
    /// A pending login was consumed by this response.
    consumed: bool,
}

impl Resolution {
    fn rejected(status: StatusCode, outcome: CallbackOutcome) -> Self {
        Self {
            state: None,
            status,
            outcome,
            consumed: false,
        }
    }
}

/// Resolves callbacks against the pending-login store and the protocol engine.
pub struct CallbackPipeline {
    store: CorrelationStore,
    waiters: DashMap<String, oneshot::Sender<LoginResult>>,
    engine: Arc<dyn ProtocolEngine>,
    known_clients: KnownClients,
    clock: Arc<dyn Clock>,
    allow_unsolicited: AtomicBool,
    template: RwLock<HtmlTemplate>,
    events: broadcast::Sender<LoginCompleted>,
}

impl CallbackPipeline {
    pub fn new(
        store: CorrelationStore,
        engine: Arc<dyn ProtocolEngine>,
        known_clients: KnownClients,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            waiters: DashMap::new(),
            engine,
            known_clients,
            clock,
            allow_unsolicited: AtomicBool::new(false),
            template: RwLock::new(HtmlTemplate::default()),
            events,
        }
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    /// Store `pending` and return the receiver its own result is delivered to.
    ///
    /// Delivery does not go through the broadcast channel, so a burst of
    /// unrelated callbacks cannot push the result out.
    pub(crate) fn expect(&self, pending: PendingLogin) -> oneshot::Receiver<LoginResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(pending.state.clone(), tx);
        self.store.put(pending);
        rx
    }

    /// Drop a pending login and its waiter without publishing anything.
    pub(crate) fn withdraw(&self, state: &str) -> Option<PendingLogin> {
        self.waiters.remove(state);
        self.store.take(state)
    }

    pub fn known_clients(&self) -> &KnownClients {
        &self.known_clients
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoginCompleted> {
        self.events.subscribe()
    }

    pub fn allow_unsolicited(&self) -> bool {
        self.allow_unsolicited.load(Ordering::Acquire)
    }

    /// Accept responses this process did not initiate. Insecure; testing only.
    pub fn set_allow_unsolicited(&self, allow: bool) {
        if allow {
            tracing::warn!("unsolicited login responses enabled; callbacks are not verified");
        }
        self.allow_unsolicited.store(allow, Ordering::Release);
    }

    pub fn template(&self) -> HtmlTemplate {
        self.template.read_or_recover().clone()
    }

    pub fn set_template(&self, template: HtmlTemplate) {
        *self.template.write_or_recover() = template;
    }

    pub(crate) fn update_template(&self, update: impl FnOnce(&mut HtmlTemplate)) {
        update(&mut self.template.write_or_recover());
    }

    /// Resolve a raw response that arrived outside the HTTP listener.
    pub async fn handle_raw(&self, raw: &str) -> CallbackOutcome {
        let resolution = self.resolve(raw).await;
        tracing::debug!(
            status = resolution.status.as_u16(),
            "handled raw login response"
        );
        let outcome = resolution.outcome.clone();
        self.publish(resolution);
        outcome
    }

    pub(crate) async fn handle_request(&self, request: CallbackRequest<'_>) -> CallbackReply {
        let resolution = match request.method {
            "GET" => {
                let query = request.query.unwrap_or_default();
                self.resolve(query).await
            }
            "POST" if !is_form_content(request.content_type) => {
                let content_type = request.content_type.unwrap_or("unspecified");
                Resolution::rejected(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    CallbackOutcome::Malformed(format!("{content_type} content is not supported.")),
                )
            }
            "POST" => {
                let body = String::from_utf8_lossy(request.body);
                self.resolve(&body).await
            }
            other => Resolution::rejected(
                StatusCode::METHOD_NOT_ALLOWED,
                CallbackOutcome::Malformed(format!("{other} method is not supported.")),
            ),
        };

        let page = self.render(&resolution.outcome);
        let status = resolution.status;
        let outcome = resolution.outcome.clone();
        tracing::debug!(
            method = request.method,
            status = status.as_u16(),
            "handled login callback"
        );
        self.publish(resolution);
        CallbackReply {
            status,
            page,
            outcome,
        }
    }

    async fn resolve(&self, raw: &str) -> Resolution {
        let raw = raw.trim();
        if raw.trim_start_matches('?').is_empty() {
            return Resolution::rejected(
                StatusCode::BAD_REQUEST,
                CallbackOutcome::Malformed(NO_DATA_DESCRIPTION.into()),
            );
        }

        let response = AuthorizeResponse::parse(raw);
        let state = response.state.clone().filter(|s| !s.is_empty());

        if response.is_error() {
            let consumed = state
                .as_deref()
                .is_some_and(|state| self.store.take(state).is_some());
            if consumed {
                tracing::debug!(
                    state = %state.as_deref().map(short_state).unwrap_or_default(),
                    "provider error retired pending login"
                );
            }
            let outcome = CallbackOutcome::protocol_error(
                response.error.unwrap_or_default(),
                response.error_description.unwrap_or_default(),
            );
            return Resolution {
                state,
                status: StatusCode::BAD_REQUEST,
                outcome,
                consumed,
            };
        }

        if let Some(pending) = state.as_deref().and_then(|s| self.store.take(s)) {
            let (status, outcome) = exchange(self.engine.as_ref(), raw, &pending).await;
            return Resolution {
                state,
                status,
                outcome,
                consumed: true,
            };
        }

        if self.allow_unsolicited() {
            if let Some((status, outcome)) = self.resolve_unsolicited(raw, &response).await {
                return Resolution {
                    state,
                    status,
                    outcome,
                    consumed: false,
                };
            }
        }

        tracing::warn!(
            state = %state.as_deref().map(short_state).unwrap_or("<none>"),
            "login response did not match a pending login"
        );
        Resolution {
            state,
            status: StatusCode::BAD_REQUEST,
            outcome: CallbackOutcome::Unmatched,
            consumed: false,
        }
    }

    async fn resolve_unsolicited(
        &self,
        raw: &str,
        response: &AuthorizeResponse,
    ) -> Option<(StatusCode, CallbackOutcome)> {
        let (key, engine) = self
            .known_clients
            .resolve(response.id_token.as_deref(), response.scope.as_deref())?;
        tracing::warn!(client = %key, "accepting unsolicited login response");

        let prepared = match engine.prepare_login(&ExtraParams::new()).await {
            Ok(prepared) => prepared,
            Err(err) => return Some((StatusCode::BAD_REQUEST, err.into())),
        };
        // The engine checks the response against the context it just prepared.
        let raw = replace_state(raw, &prepared.state);
        let pending = PendingLogin {
            state: prepared.state,
            context: prepared.context,
            created_at: self.clock.now(),
            hints: LoginHints::default(),
        };
        Some(exchange(engine.as_ref(), &raw, &pending).await)
    }

    fn render(&self, outcome: &CallbackOutcome) -> String {
        let template = self.template.read_or_recover();
        match outcome.error_parts() {
            None => template.success_page(),
            Some((code, description)) => template.error_page(code, description),
        }
    }

    fn publish(&self, resolution: Resolution) {
        let Resolution {
            state,
            outcome,
            consumed,
            ..
        } = resolution;
        let result = outcome.into_result();
        if consumed {
            if let Some((_, waiter)) = state.as_deref().and_then(|s| self.waiters.remove(s)) {
                if waiter.send(result.clone()).is_err() {
                    tracing::debug!("login attempt handle dropped before completion");
                }
            }
        }
        let event = LoginCompleted { state, result };
        if self.events.send(event).is_err() {
            tracing::debug!("login completed with no subscribers");
        }
    }
}

async fn exchange(
    engine: &dyn ProtocolEngine,
    raw: &str,
    pending: &PendingLogin,
) -> (StatusCode, CallbackOutcome) {
    match engine.process_response(raw, pending).await {
        Ok(success) => {
            tracing::info!(state = %short_state(&pending.state), "login completed");
            (StatusCode::OK, CallbackOutcome::Success(success))
        }
        Err(err) => {
            tracing::warn!(
                state = %short_state(&pending.state),
                error = %err,
                "code exchange failed"
            );
            (StatusCode::BAD_REQUEST, err.into())
        }
    }
}

fn is_form_content(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .is_some_and(|media| media.eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}
