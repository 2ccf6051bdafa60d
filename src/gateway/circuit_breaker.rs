// =============================================================================
// CircuitBreaker — protects exchange calls from cascading failure
// =============================================================================
//
// State machine per endpoint family:
//   closed   -> open      on N consecutive failures or rate-limit responses
//   open     -> half_open after an exponential cooldown (2s, 4s, 8s, capped)
//   half_open -> closed   on one success; back to open on failure
//
// When open, callers must treat the endpoint as a soft failure for the
// remainder of the cycle rather than retrying immediately.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 3;
const BASE_COOLDOWN_SECS: u64 = 2;
const MAX_COOLDOWN_SECS: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown_attempt: u32,
}

/// A single circuit breaker, typically one per endpoint family
/// (e.g. market-data reads vs. order submission).
pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                cooldown_attempt: 0,
            }),
        }
    }

    fn cooldown_for_attempt(attempt: u32) -> Duration {
        let secs = BASE_COOLDOWN_SECS.saturating_mul(1u64 << attempt.min(2));
        Duration::from_secs(secs.min(MAX_COOLDOWN_SECS))
    }

    /// Whether a call may currently proceed. Transitions `open -> half_open`
    /// as a side effect once the cooldown has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let Some(opened_at) = inner.opened_at else {
                    return true;
                };
                let cooldown = Self::cooldown_for_attempt(inner.cooldown_attempt);
                if opened_at.elapsed() >= cooldown {
                    inner.state = BreakerState::HalfOpen;
                    crate::telemetry::breaker_transition(&self.name, "open", "half_open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        if inner.state != BreakerState::Closed {
            crate::telemetry::breaker_transition(&self.name, inner.state.as_str(), "closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.cooldown_attempt = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.cooldown_attempt = inner.cooldown_attempt.saturating_add(1);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                crate::telemetry::breaker_transition(&self.name, "half_open", "open");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    crate::telemetry::breaker_transition(&self.name, "closed", "open");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }
}
