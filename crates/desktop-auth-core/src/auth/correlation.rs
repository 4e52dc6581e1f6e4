use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{EngineContext, LoginHints};

/// A login waiting for its redirect callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub state: String,
    pub context: EngineContext,
    pub created_at: DateTime<Utc>,
    pub hints: LoginHints,
}

/// Concurrent map from correlation id (`state`) to the pending login it belongs to.
///
/// Entries are consumed by [`take`](Self::take); a consumed id can never match again.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStore {
    pending: Arc<DashMap<String, PendingLogin>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending login. An existing entry for the same id is replaced.
    pub fn put(&self, pending: PendingLogin) {
        let state = pending.state.clone();
        if self.pending.insert(state.clone(), pending).is_some() {
            tracing::warn!(
                state = %short_state(&state),
                "correlation id collision; replaced pending login"
            );
        }
    }

    /// Atomically remove and return the pending login for `state`.
    pub fn take(&self, state: &str) -> Option<PendingLogin> {
        self.pending.remove(state).map(|(_, pending)| pending)
    }

    pub fn contains(&self, state: &str) -> bool {
        self.pending.contains_key(state)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Prefix of a correlation id that is safe to put in logs.
pub(crate) fn short_state(state: &str) -> &str {
    match state.char_indices().nth(8) {
        Some((idx, _)) => &state[..idx],
        None => state,
    }
}
