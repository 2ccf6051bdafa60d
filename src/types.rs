// =============================================================================
// Shared types used across the spot trading engine
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque `BASE/QUOTE` trading pair (e.g. `BTC/USDT`).
///
/// Internally the engine only ever works with this slash form. The
/// exchange-native `BASE-QUOTE` form is produced and parsed only at the
/// gateway boundary (`crate::gateway`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(base: &str, quote: &str) -> Self {
        Self(format!("{}/{}", base.to_uppercase(), quote.to_uppercase()))
    }

    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn quote(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or("")
    }

    /// Render in exchange-native `BASE-QUOTE` form.
    pub fn to_gateway(&self) -> String {
        self.0.replace('/', "-")
    }

    /// Parse an exchange-native `BASE-QUOTE` string back into a `Symbol`.
    pub fn from_gateway(raw: &str) -> Self {
        Self(raw.replace('-', "/").to_uppercase())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        if s.contains('-') && !s.contains('/') {
            Self::from_gateway(s)
        } else {
            Self(s.to_uppercase())
        }
    }
}

/// Candle timeframes the engine is willing to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Exchange-native bar string, e.g. `5m`, `1H`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1H",
            Self::H4 => "4H",
            Self::D1 => "1D",
        }
    }

    /// Duration of one bar, used to derive the candle-cache TTL.
    pub fn bar_duration(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            Self::M5 => Duration::from_secs(5 * 60),
            Self::M15 => Duration::from_secs(15 * 60),
            Self::H1 => Duration::from_secs(60 * 60),
            Self::H4 => Duration::from_secs(4 * 60 * 60),
            Self::D1 => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Weight this timeframe carries in the confluence calculation.
    pub fn confluence_weight(self) -> f64 {
        match self {
            Self::M5 => 0.10,
            Self::M15 => 0.15,
            Self::H1 => 0.25,
            Self::H4 => 0.30,
            Self::D1 => 0.20,
        }
    }

    pub const ALL: [Timeframe; 5] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV bar.
///
/// Invariants: `low <= open,close <= high`, `volume >= 0`. Malformed candles
/// are rejected at the gateway boundary before they reach this type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_valid(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
            && self.volume >= 0.0
            && self.low <= self.open
            && self.low <= self.close
            && self.low <= self.high
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// Best-bid/ask plus 24h aggregates for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub last: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub quote_volume_24h: f64,
    pub percent_change_24h: f64,
    pub best_bid: f64,
    pub best_ask: f64,
}

/// A single (price, size) level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// A depth snapshot. Invariant: `asks[0].price > bids[0].price > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Descending by price.
    pub bids: Vec<BookLevel>,
    /// Ascending by price.
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

impl OrderBookSnapshot {
    pub fn is_valid(&self) -> bool {
        match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => b.price > 0.0 && a.price > b.price,
            _ => false,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let b = self.bids.first()?;
        let a = self.asks.first()?;
        if b.price == 0.0 {
            return None;
        }
        Some((a.price - b.price) / b.price * 10_000.0)
    }
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceInfo {
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub total: f64,
}

/// A regular (non-algo) order as reported by the open-orders endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: String,
    pub order_type: String,
}

/// A live algo (OCO/conditional/trigger) order as reported by the dedicated
/// algo-orders endpoint. Kept distinct from [`Order`] deliberately: folding
/// the two lists together is the single most frequent latent bug this design
/// guards against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoOrder {
    pub algo_id: String,
    pub symbol: Symbol,
    pub state: String,
}

/// Result of submitting a market buy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_base: f64,
    pub avg_price: f64,
    pub status: String,
}

/// Result of submitting an OCO sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoAck {
    pub algo_id: String,
    pub status: String,
    pub error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_gateway_roundtrip() {
        let s = Symbol::new("btc", "usdt");
        assert_eq!(s.to_string(), "BTC/USDT");
        assert_eq!(s.to_gateway(), "BTC-USDT");
        assert_eq!(Symbol::from_gateway("BTC-USDT"), s);
    }

    #[test]
    fn candle_validity() {
        let good = Candle {
            open_time: 0,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 5.0,
        };
        assert!(good.is_valid());

        let bad = Candle { high: 8.0, ..good };
        assert!(!bad.is_valid());
    }

    #[test]
    fn order_book_invariant() {
        let snap = OrderBookSnapshot {
            bids: vec![BookLevel {
                price: 100.0,
                size: 1.0,
            }],
            asks: vec![BookLevel {
                price: 100.5,
                size: 1.0,
            }],
            timestamp: 0,
        };
        assert!(snap.is_valid());
        assert!(snap.spread_bps().unwrap() > 0.0);
    }
}
