//! Best-effort correlation for callbacks this process never asked for.
//!
//! Nothing here is validated: issuer and audience are read straight out of an
//! unverified ID token. Only enable it for testing.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use serde::Deserialize;
use url::Url;

use super::ProtocolEngine;

/// Registry key: identity-provider host, client id, and requested scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub server: String,
    pub client_id: String,
    pub scope: String,
}

impl ClientKey {
    pub fn new(
        server: impl Into<String>,
        client_id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            client_id: client_id.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.server, self.client_id, self.scope)
    }
}

/// Engines that may complete a login they did not start.
#[derive(Clone, Default)]
pub struct KnownClients {
    engines: Arc<DashMap<ClientKey, Arc<dyn ProtocolEngine>>>,
}

impl KnownClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: ClientKey, engine: Arc<dyn ProtocolEngine>) {
        tracing::debug!(client = %key, "registered known client");
        self.engines.insert(key, engine);
    }

    pub fn get(&self, key: &ClientKey) -> Option<Arc<dyn ProtocolEngine>> {
        self.engines.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Find the engine for an unsolicited response carrying `id_token` and `scope`.
    pub fn resolve(
        &self,
        id_token: Option<&str>,
        scope: Option<&str>,
    ) -> Option<(ClientKey, Arc<dyn ProtocolEngine>)> {
        let identity = UnvalidatedIdentity::from_id_token(id_token?)?;
        let key = ClientKey::new(identity.server, identity.client_id, scope.unwrap_or_default());
        let engine = self.get(&key)?;
        Some((key, engine))
    }
}

impl fmt::Debug for KnownClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnownClients")
            .field("len", &self.engines.len())
            .finish()
    }
}

/// Issuer host and audience read from an ID token without verifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnvalidatedIdentity {
    pub server: String,
    pub client_id: String,
}

#[derive(Deserialize)]
struct RawClaims {
    iss: Option<String>,
    aud: Option<Audience>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl UnvalidatedIdentity {
    pub fn from_id_token(id_token: &str) -> Option<Self> {
        let payload = id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: RawClaims = serde_json::from_slice(&bytes).ok()?;

        let issuer = Url::parse(&claims.iss?).ok()?;
        let server = issuer.host_str()?.to_owned();
        let client_id = match claims.aud? {
            Audience::One(aud) => aud,
            Audience::Many(auds) => auds.into_iter().next()?,
        };
        Some(Self { server, client_id })
    }
}
