//! Browser-delegated sign-in for native applications.
//!
//! [`LoginOrchestrator`] opens the system browser on a request prepared by a
//! [`ProtocolEngine`], receives the redirect on a loopback
//! [`RedirectListener`], and correlates it with the pending login through the
//! [`CorrelationStore`]. [`AccessTokenRefresher`] keeps the resulting access
//! token fresh.

mod browser;
mod callback;
mod clock;
mod correlation;
mod engine;
mod error;
mod listener;
mod orchestrator;
mod refresher;
mod response;
mod session;
mod template;
mod unsolicited;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use callback::{CallbackOutcome, CallbackPipeline, LoginCompleted};
pub use clock::{Clock, SystemClock};
pub use correlation::{CorrelationStore, PendingLogin};
pub use engine::{EngineContext, ExtraParams, LoginHints, PreparedLogin, ProtocolEngine};
pub use error::{AuthError, EngineError};
pub use listener::{ListenerConfig, RedirectListener};
pub use orchestrator::{LoginAttempt, LoginOrchestrator};
pub use refresher::{
    AccessTokenRefresher, RefreshEvent, RefreshPolicy, DEFAULT_REFRESH_LEAD_MINUTES,
    DEFAULT_RETRY_DELAY_SECS,
};
pub use response::AuthorizeResponse;
pub use session::{AccessTokenSnapshot, Claims, LoginError, LoginResult, LoginSuccess, TokenSet};
pub use template::{HtmlTemplate, DEFAULT_TEMPLATE};
pub use unsolicited::{ClientKey, KnownClients, UnvalidatedIdentity};
