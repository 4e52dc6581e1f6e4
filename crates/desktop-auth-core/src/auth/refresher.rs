//! Background renewal of an access token ahead of its expiry.
//!
//! One cycle runs per [`AccessTokenRefresher::start`]. A cycle waits until the
//! token enters the refresh window, renews it, and on failure retries after a
//! fixed delay until it succeeds or is cancelled. A renewal that returns a
//! token already inside the window waits the same delay before the next
//! call. Every cycle carries a
//! generation number; a cycle whose generation is no longer current cannot
//! publish tokens or raise events, even if its engine call was already in
//! flight when it was superseded.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{AccessTokenSnapshot, Clock, ProtocolEngine, SystemClock, TokenSet};
use crate::sync_ext::MutexExt;

pub const DEFAULT_REFRESH_LEAD_MINUTES: i64 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
const EVENT_CAPACITY: usize = 16;

/// Timing knobs for the renewal loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Renew once the remaining validity is at most this long.
    pub lead: Duration,
    /// Delay between failed renewal attempts.
    pub retry_delay: StdDuration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::minutes(DEFAULT_REFRESH_LEAD_MINUTES),
            retry_delay: StdDuration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

/// Result of a renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Refreshed(AccessTokenSnapshot),
    Failed { reason: String },
}

#[derive(Default)]
struct CycleState {
    generation: u64,
    cancel: Option<CancellationToken>,
    refresh_token: Option<String>,
    snapshot: Option<AccessTokenSnapshot>,
}

struct Shared {
    state: Mutex<CycleState>,
    events: broadcast::Sender<RefreshEvent>,
}

impl Shared {
    fn current(&self, generation: u64) -> Option<(String, DateTime<Utc>)> {
        let state = self.state.lock_or_recover();
        if state.generation != generation {
            return None;
        }
        let refresh_token = state.refresh_token.clone()?;
        let expires_at = state.snapshot.as_ref()?.expires_at;
        Some((refresh_token, expires_at))
    }

    fn publish_success(&self, generation: u64, tokens: TokenSet) -> bool {
        let mut state = self.state.lock_or_recover();
        if state.generation != generation {
            return false;
        }
        let snapshot = AccessTokenSnapshot {
            access_token: tokens.access_token,
            expires_at: tokens.expires_at,
        };
        if let Some(refresh_token) = tokens.refresh_token.filter(|t| !t.is_empty()) {
            state.refresh_token = Some(refresh_token);
        }
        state.snapshot = Some(snapshot.clone());
        let _ = self.events.send(RefreshEvent::Refreshed(snapshot));
        true
    }

    fn publish_failure(&self, generation: u64, reason: String) -> bool {
        let state = self.state.lock_or_recover();
        if state.generation != generation {
            return false;
        }
        let _ = self.events.send(RefreshEvent::Failed { reason });
        true
    }
}

/// Keeps an access token fresh using its refresh token.
///
/// Dropping the refresher stops its active cycle.
pub struct AccessTokenRefresher {
    engine: Arc<dyn ProtocolEngine>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    shared: Arc<Shared>,
}

impl AccessTokenRefresher {
    pub fn new(engine: Arc<dyn ProtocolEngine>) -> Self {
        Self::with_clock(engine, Arc::new(SystemClock), RefreshPolicy::default())
    }

    pub fn with_clock(
        engine: Arc<dyn ProtocolEngine>,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            clock,
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(CycleState::default()),
                events,
            }),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Begin renewing `access_token`, replacing any running cycle.
    ///
    /// An empty `refresh_token` only stops the previous cycle. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, refresh_token: &str, access_token: &str, expires_at: DateTime<Utc>) {
        let (generation, cancel) = {
            let mut state = self.shared.state.lock_or_recover();
            state.generation += 1;
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
                tracing::debug!("superseded previous refresh cycle");
            }
            if refresh_token.is_empty() {
                tracing::debug!("no refresh token; refresh cycle not started");
                return;
            }

            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            state.refresh_token = Some(refresh_token.to_owned());
            state.snapshot = Some(AccessTokenSnapshot {
                access_token: access_token.to_owned(),
                expires_at,
            });
            (state.generation, cancel)
        };

        tracing::info!(generation, %expires_at, "starting access token refresh cycle");
        let cycle = RefreshCycle {
            engine: Arc::clone(&self.engine),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            shared: Arc::clone(&self.shared),
            generation,
            cancel,
        };
        tokio::spawn(cycle.run());
    }

    /// Cancel the active cycle. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock_or_recover();
        if let Some(cancel) = state.cancel.take() {
            state.generation += 1;
            cancel.cancel();
            tracing::info!("stopped access token refresh cycle");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock_or_recover().cancel.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.shared.events.subscribe()
    }

    /// Latest published access token and expiry.
    pub fn snapshot(&self) -> Option<AccessTokenSnapshot> {
        self.shared.state.lock_or_recover().snapshot.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.snapshot().map(|s| s.access_token)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|s| s.expires_at)
    }
}

impl Drop for AccessTokenRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RefreshCycle {
    engine: Arc<dyn ProtocolEngine>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
}

impl RefreshCycle {
    async fn run(self) {
        loop {
            let Some((refresh_token, expires_at)) = self.shared.current(self.generation) else {
                return;
            };

            let remaining = expires_at - self.clock.now();
            if remaining > self.policy.lead {
                let wait = (remaining - self.policy.lead)
                    .to_std()
                    .unwrap_or(StdDuration::ZERO);
                tracing::debug!(
                    generation = self.generation,
                    wait_secs = wait.as_secs(),
                    "waiting for refresh window"
                );
                if !self.sleep(wait).await {
                    return;
                }
                continue;
            }

            if self.cancel.is_cancelled() {
                return;
            }

            match self.engine.refresh_token(&refresh_token).await {
                Ok(tokens) => {
                    let expires_at = tokens.expires_at;
                    if !self.shared.publish_success(self.generation, tokens) {
                        tracing::debug!(
                            generation = self.generation,
                            "discarded renewal for superseded cycle"
                        );
                        return;
                    }
                    tracing::info!(
                        generation = self.generation,
                        %expires_at,
                        "access token refreshed"
                    );
                    // Short-lived tokens land inside the window again; pace the next call.
                    if expires_at - self.clock.now() <= self.policy.lead {
                        tracing::warn!(
                            generation = self.generation,
                            retry_secs = self.policy.retry_delay.as_secs(),
                            "renewed token already inside refresh window"
                        );
                        if !self.sleep(self.policy.retry_delay).await {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        generation = self.generation,
                        retry_secs = self.policy.retry_delay.as_secs(),
                        error = %err,
                        "access token refresh failed"
                    );
                    if !self.shared.publish_failure(self.generation, err.to_string()) {
                        return;
                    }
                    if !self.sleep(self.policy.retry_delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled first; returns `false` on cancellation.
    async fn sleep(&self, duration: StdDuration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
