// =============================================================================
// Telemetry
// =============================================================================
//
// Thin wrappers around `tracing` events for every structured event the engine
// emits. Centralising the field vocabulary here means a future swap to a
// metrics backend only touches this file, and every call site gets the same
// `symbol`/`kind`/`code`/`message` shape instead of ad-hoc formatted strings.

use crate::types::Symbol;
use tracing::{info, warn};

pub fn position_loaded(symbol: &Symbol, source: &str) {
    info!(symbol = %symbol, kind = "position_loaded", source, "position loaded");
}

pub fn position_persisted(symbol: &Symbol) {
    info!(symbol = %symbol, kind = "position_persisted", "position persisted to disk");
}

pub fn position_reconciled(symbol: &Symbol, free_balance: f64, has_live_algo: bool) {
    info!(
        symbol = %symbol,
        kind = "position_reconciled",
        free_balance,
        has_live_algo,
        "position reconciled against exchange state"
    );
}

pub fn position_evicted(symbol: &Symbol, reason: &str) {
    info!(symbol = %symbol, kind = "position_evicted", reason, "position evicted from store");
}

pub fn protection_missing(symbol: &Symbol, reason: &str) {
    warn!(symbol = %symbol, kind = "protection_missing", reason, "position has no exchange-managed protection");
}

pub fn duplicate_buy_prevented(symbol: &Symbol) {
    warn!(symbol = %symbol, kind = "duplicate_buy_prevented", "duplicate buy blocked");
}

pub fn position_held(symbol: &Symbol) {
    info!(symbol = %symbol, kind = "position_held", "symbol already tracked, holding");
}

pub fn ranking_changed(symbol: &Symbol, old_total: f64, new_total: f64) {
    info!(
        symbol = %symbol,
        kind = "ranking_changed",
        old_total,
        new_total,
        delta = new_total - old_total,
        "token ranking changed"
    );
}

pub fn cycle_summary(symbols_considered: usize, decisions_made: usize, executions: usize, duration_ms: u128) {
    info!(
        kind = "cycle_summary",
        symbols_considered,
        decisions_made,
        executions,
        duration_ms,
        "cycle complete"
    );
}

pub fn breaker_transition(name: &str, from: &str, to: &str) {
    warn!(kind = "breaker_transition", name, from, to, "circuit breaker state changed");
}

pub fn gateway_error(endpoint: &str, code: &str, message: &str) {
    warn!(kind = "gateway_error", endpoint, code, message, "gateway call failed");
}
