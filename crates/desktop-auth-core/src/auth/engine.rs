use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{EngineError, LoginSuccess, PendingLogin, TokenSet};

/// Provider-specific query parameters appended to the authorization request.
pub type ExtraParams = Vec<(String, String)>;

/// Caller-supplied hints used only to build the authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginHints {
    /// Tenant (client code) to preselect on the sign-in page.
    pub tenant: Option<String>,
    /// Account (usually an email address) to prefill.
    pub account: Option<String>,
    /// Always show the credential prompt even with an active provider session.
    pub force_prompt: bool,
}

impl LoginHints {
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn force_prompt(mut self, force: bool) -> Self {
        self.force_prompt = force;
        self
    }

    pub fn to_extra_params(&self) -> ExtraParams {
        let mut params = ExtraParams::new();
        if let Some(tenant) = non_empty(self.tenant.as_deref()) {
            params.push(("acr_values".into(), format!("tenant:{tenant}")));
        }
        if let Some(account) = non_empty(self.account.as_deref()) {
            params.push(("login_hint".into(), account.to_owned()));
        }
        if self.force_prompt {
            params.push(("prompt".into(), "login".into()));
        }
        params
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Opaque per-login material (PKCE verifier, nonce, ...) owned by the engine.
#[derive(Clone)]
pub struct EngineContext(Arc<dyn Any + Send + Sync>);

impl EngineContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EngineContext(..)")
    }
}

/// Authorization request prepared by the engine.
#[derive(Debug, Clone)]
pub struct PreparedLogin {
    /// Provider-issued correlation id, echoed back as `state`.
    pub state: String,
    /// URL the browser must open.
    pub start_url: Url,
    pub context: EngineContext,
}

/// Capabilities consumed from the OpenID Connect protocol engine.
///
/// Implementations own PKCE, discovery, and ID-token validation; this crate
/// only sequences the calls.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Build an authorization request carrying `extra` as additional parameters.
    async fn prepare_login(&self, extra: &ExtraParams) -> Result<PreparedLogin, EngineError>;

    /// Validate the raw redirect response and exchange its code for tokens.
    async fn process_response(
        &self,
        raw_response: &str,
        pending: &PendingLogin,
    ) -> Result<LoginSuccess, EngineError>;

    /// Redeem a refresh token for a fresh token set.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, EngineError>;
}
