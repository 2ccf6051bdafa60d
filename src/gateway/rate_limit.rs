// =============================================================================
// Rate-Limit Tracker — token-bucket budget for exchange API calls
// =============================================================================
//
// OKX doesn't echo back a used-weight header the way Binance does, so instead
// of reading response headers we track a simple per-minute request budget
// ourselves: `can_send_request` reserves budget before the call, and the
// bucket refills on a timer. Order submissions are tracked the same way to
// stay well under OKX's per-endpoint rate limits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Requests allowed per rolling minute window.
const REQUEST_BUDGET_PER_MINUTE: u32 = 500;
/// Soft warning threshold.
const REQUEST_WARN_THRESHOLD: u32 = 400;
/// Orders allowed per rolling 10-second window.
const ORDER_BUDGET_PER_10S: u32 = 20;

/// Thread-safe token-bucket tracker backed by atomic counters.
pub struct RateLimitTracker {
    window_start_secs: AtomicU64,
    requests_this_window: AtomicU32,
    order_window_start_secs: AtomicU64,
    orders_this_window: AtomicU32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub requests_this_window: u32,
    pub orders_this_window: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            window_start_secs: AtomicU64::new(Self::now_secs()),
            requests_this_window: AtomicU32::new(0),
            order_window_start_secs: AtomicU64::new(Self::now_secs()),
            orders_this_window: AtomicU32::new(0),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs()
    }

    fn maybe_roll_window(&self) {
        let now = Self::now_secs();
        let start = self.window_start_secs.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= 60 {
            self.window_start_secs.store(now, Ordering::Relaxed);
            self.requests_this_window.store(0, Ordering::Relaxed);
        }

        let order_start = self.order_window_start_secs.load(Ordering::Relaxed);
        if now.saturating_sub(order_start) >= 10 {
            self.order_window_start_secs.store(now, Ordering::Relaxed);
            self.orders_this_window.store(0, Ordering::Relaxed);
        }
    }

    /// Return `true` if `weight` more requests can be sent in the current
    /// window without exceeding the per-minute budget.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.maybe_roll_window();
        let current = self.requests_this_window.load(Ordering::Relaxed);
        let allowed = current + weight <= REQUEST_BUDGET_PER_MINUTE;
        if !allowed {
            warn!(
                current_requests = current,
                requested = weight,
                budget = REQUEST_BUDGET_PER_MINUTE,
                "request blocked — would exceed per-minute budget"
            );
        } else if current + weight >= REQUEST_WARN_THRESHOLD {
            warn!(current_requests = current, "request budget nearing per-minute limit");
        }
        allowed
    }

    pub fn record_request_sent(&self) {
        self.requests_this_window.fetch_add(1, Ordering::Relaxed);
    }

    pub fn can_place_order(&self) -> bool {
        self.maybe_roll_window();
        let count = self.orders_this_window.load(Ordering::Relaxed);
        if count >= ORDER_BUDGET_PER_10S {
            warn!(count, limit = ORDER_BUDGET_PER_10S, "order blocked — 10s order budget reached");
            return false;
        }
        true
    }

    pub fn record_order_sent(&self) {
        self.orders_this_window.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            requests_this_window: self.requests_this_window.load(Ordering::Relaxed),
            orders_this_window: self.orders_this_window.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("requests_this_window", &self.requests_this_window.load(Ordering::Relaxed))
            .field("orders_this_window", &self.orders_this_window.load(Ordering::Relaxed))
            .finish()
    }
}
