//! Circuit breaker store — disables chronically failing handlers.
//!
//! State is keyed by handler identity and lives for the lifetime of the
//! process. Once a handler is disabled it stays disabled until reset.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Consecutive failures after which a handler is disabled.
pub const FAILURE_THRESHOLD: u32 = 3;

static SHARED: LazyLock<Arc<CircuitBreaker>> = LazyLock::new(|| Arc::new(CircuitBreaker::new()));

/// Message returned instead of running a disabled handler.
pub fn disabled_message() -> String {
    format!("Hook disabled after {FAILURE_THRESHOLD} consecutive failures")
}

/// Append the disablement note to `message` when the failure just tripped the breaker.
pub(crate) fn note_if_tripped(message: String, tripped: bool) -> String {
    if tripped {
        format!("{message} (hook disabled after {FAILURE_THRESHOLD} consecutive failures)")
    } else {
        message
    }
}

/// Failure bookkeeping for one handler identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerState {
    pub failure_count: u32,
    pub disabled: bool,
}

/// Per-handler failure counters, safe to share across concurrent runners.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store used when a runner is not given its own.
    pub fn shared() -> Arc<CircuitBreaker> {
        Arc::clone(&SHARED)
    }

    /// Reset the failure count. Does not re-enable a disabled handler.
    pub fn record_success(&self, id: &str) {
        let mut states = self.lock();
        states.entry(id.to_string()).or_default().failure_count = 0;
    }

    /// Count a failure. Returns `true` when this failure disabled the handler.
    pub fn record_failure(&self, id: &str) -> bool {
        let mut states = self.lock();
        let state = states.entry(id.to_string()).or_default();
        state.failure_count = state.failure_count.saturating_add(1);
        if state.failure_count >= FAILURE_THRESHOLD && !state.disabled {
            state.disabled = true;
            tracing::warn!(
                handler = id,
                failures = state.failure_count,
                "Hook disabled after {FAILURE_THRESHOLD} consecutive failures"
            );
            return true;
        }
        false
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.lock().get(id).is_some_and(|state| state.disabled)
    }

    /// Current state for `id`, if it has ever been recorded.
    pub fn state(&self, id: &str) -> Option<BreakerState> {
        self.lock().get(id).copied()
    }

    pub fn reset(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    /// All tracked identities and their state, sorted by identity.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerState>> {
        // A panic mid-update cannot leave the counters inconsistent.
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
