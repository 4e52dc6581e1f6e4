use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the login orchestrator, listener, and refresher.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to bind redirect listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid callback path '{0}'")]
    InvalidCallbackPath(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to launch system browser: {0}")]
    BrowserLaunch(String),
    #[error("login handler has been shut down")]
    Disposed,
    #[error("redirect listener terminated before a login result was delivered")]
    ListenerClosed,
}

impl AuthError {
    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        AuthError::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Failures reported by a [`ProtocolEngine`](super::ProtocolEngine).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The identity provider or the engine rejected the request.
    #[error("{code} - {description}")]
    Protocol { code: String, description: String },
    /// The engine could not reach the identity provider.
    #[error("{0}")]
    Transport(String),
}

impl EngineError {
    pub fn protocol(code: impl Into<String>, description: impl Into<String>) -> Self {
        EngineError::Protocol {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        EngineError::Transport(message.into())
    }
}
