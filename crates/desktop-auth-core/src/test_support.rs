//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::auth::{
    Claims, Clock, EngineContext, EngineError, ExtraParams, LoginSuccess, PendingLogin,
    PreparedLogin, ProtocolEngine, SystemClock, TokenSet,
};

/// Clock that follows tokio's (possibly paused) timer.
pub(crate) struct TokioClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

/// Scripted protocol engine recording every call it receives.
pub(crate) struct FakeEngine {
    clock: Arc<dyn Clock>,
    prepared: AtomicUsize,
    exchange_results: Mutex<VecDeque<Result<LoginSuccess, EngineError>>>,
    refresh_results: Mutex<VecDeque<Result<TokenSet, EngineError>>>,
    exchanges: Mutex<Vec<String>>,
    refreshes: Mutex<Vec<String>>,
    extra_params: Mutex<Vec<ExtraParams>>,
    refresh_delay: Mutex<Duration>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub(crate) fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            prepared: AtomicUsize::new(0),
            exchange_results: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            exchanges: Mutex::new(Vec::new()),
            refreshes: Mutex::new(Vec::new()),
            extra_params: Mutex::new(Vec::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Login success with an access token valid for one hour.
    pub(crate) fn success(&self, access_token: &str) -> LoginSuccess {
        let mut claims = Claims::new();
        claims.insert("sub".into(), serde_json::json!("user-1"));
        LoginSuccess::new(
            self.tokens(access_token, chrono::Duration::minutes(60))
                .with_refresh_token("RT1"),
            claims,
        )
    }

    pub(crate) fn tokens(&self, access_token: &str, valid_for: chrono::Duration) -> TokenSet {
        TokenSet::new(access_token, self.clock.now() + valid_for)
    }

    pub(crate) fn push_exchange(&self, result: Result<LoginSuccess, EngineError>) {
        self.exchange_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_refresh(&self, result: Result<TokenSet, EngineError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub(crate) fn exchanges(&self) -> Vec<String> {
        self.exchanges.lock().unwrap().clone()
    }

    pub(crate) fn refreshes(&self) -> Vec<String> {
        self.refreshes.lock().unwrap().clone()
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }

    pub(crate) fn prepared_count(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub(crate) fn extra_params(&self) -> Vec<ExtraParams> {
        self.extra_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolEngine for FakeEngine {
    async fn prepare_login(&self, extra: &ExtraParams) -> Result<PreparedLogin, EngineError> {
        let n = self.prepared.fetch_add(1, Ordering::SeqCst) + 1;
        self.extra_params.lock().unwrap().push(extra.clone());
        let state = format!("state-{n}");
        let mut start_url =
            Url::parse("https://login.example.com/authen/identity/connect/authorize")
                .map_err(|err| EngineError::transport(err.to_string()))?;
        start_url.query_pairs_mut().append_pair("state", &state);
        Ok(PreparedLogin {
            state,
            start_url,
            context: EngineContext::new(format!("verifier-{n}")),
        })
    }

    async fn process_response(
        &self,
        raw_response: &str,
        _pending: &PendingLogin,
    ) -> Result<LoginSuccess, EngineError> {
        self.exchanges.lock().unwrap().push(raw_response.to_owned());
        self.exchange_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::protocol("unexpected", "no scripted exchange")))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, EngineError> {
        self.refreshes.lock().unwrap().push(refresh_token.to_owned());
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::transport("no scripted refresh")))
    }
}

/// Compact JWT with an unsigned payload, enough for claim extraction.
pub(crate) fn unsigned_id_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Send a raw HTTP/1.1 request and return the status code and body.
pub(crate) async fn send_http(addr: SocketAddr, request: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf).into_owned();
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default();
    (status, body)
}

pub(crate) async fn http_get(addr: SocketAddr, target: &str) -> (u16, String) {
    send_http(
        addr,
        &format!("GET {target} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"),
    )
    .await
}
