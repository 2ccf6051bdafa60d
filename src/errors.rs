// =============================================================================
// Error taxonomy
// =============================================================================
//
// Internal plumbing (config loading, indicator math, cache bookkeeping) keeps
// propagating `anyhow::Result` as the teacher's own modules do. Operations
// whose failure mode is part of the engine's observable contract — anything
// an operator or a caller needs to match on, not just log and bubble up —
// return `Result<T, EngineError>` instead.

use crate::types::Symbol;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data absent for {symbol}: {reason}")]
    DataAbsent { symbol: Symbol, reason: &'static str },

    #[error("transient gateway error calling {endpoint}: {message}")]
    GatewayTransient { endpoint: String, message: String },

    #[error("gateway rejected request to {endpoint}: {code} {message}")]
    GatewayRejected {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error("insufficient balance for {symbol}: need {needed}, have {available}")]
    InsufficientBalance {
        symbol: Symbol,
        needed: f64,
        available: f64,
    },

    #[error("duplicate buy prevented for {symbol}")]
    DuplicateBuyPrevented { symbol: Symbol },

    #[error("protection order missing for {symbol}: {reason}")]
    ProtectionMissing { symbol: Symbol, reason: String },

    #[error("failed to persist position state: {0}")]
    PersistenceError(String),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Short machine-stable tag used in telemetry fields, kept distinct from
    /// the human-readable `Display` message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataAbsent { .. } => "data_absent",
            Self::GatewayTransient { .. } => "gateway_transient",
            Self::GatewayRejected { .. } => "gateway_rejected",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::DuplicateBuyPrevented { .. } => "duplicate_buy_prevented",
            Self::ProtectionMissing { .. } => "protection_missing",
            Self::PersistenceError(_) => "persistence_error",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// A value that is either present, or absent for a named reason.
///
/// Replaces silently falling back to a default when upstream data (a
/// ticker, an indicator, a macro reading) could not be produced — call
/// sites are forced to decide what "absent" means for them instead of a
/// `0.0`/`None` quietly propagating through the scoring math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Absent<T> {
    Present(T),
    Absent(&'static str),
}

impl<T> Absent<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Present(_) => None,
            Self::Absent(r) => Some(r),
        }
    }

    pub fn present(self) -> Option<T> {
        match self {
            Self::Present(v) => Some(v),
            Self::Absent(_) => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Present(v) => v,
            Self::Absent(_) => default,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Absent<U> {
        match self {
            Self::Present(v) => Absent::Present(f(v)),
            Self::Absent(r) => Absent::Absent(r),
        }
    }
}

impl<T> From<Option<T>> for Absent<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Self::Present(v),
            None => Self::Absent("value was None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_map_preserves_reason() {
        let a: Absent<f64> = Absent::Absent("insufficient candles");
        let mapped = a.map(|v| v * 2.0);
        assert_eq!(mapped.reason(), Some("insufficient candles"));
    }

    #[test]
    fn absent_present_unwraps() {
        let a = Absent::Present(5.0);
        assert_eq!(a.unwrap_or(0.0), 5.0);
        assert!(a.is_present());
    }

    #[test]
    fn engine_error_kind_is_stable() {
        let err = EngineError::DuplicateBuyPrevented {
            symbol: Symbol::new("btc", "usdt"),
        };
        assert_eq!(err.kind(), "duplicate_buy_prevented");
    }
}
