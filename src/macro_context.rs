// =============================================================================
// MacroContext — cached macro/sentiment snapshot, pulled through a provider
// =============================================================================
//
// Every field of MacroSnapshot is optional: a provider outage degrades the
// snapshot rather than blocking a cycle. DecisionEngine reacts to missing
// fields by widening its confidence requirement, not by substituting a
// default market view.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MACRO_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Bullish,
    Neutral,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    RiskOn,
    RiskOff,
    Transition,
}

/// Macro/sentiment snapshot. Every field is optional at the provider level;
/// a `None` here is a genuine absence, not a zero.
#[derive(Debug, Clone, Default)]
pub struct MacroSnapshot {
    pub fear_greed: Option<f64>,
    pub btc_dominance_pct: Option<f64>,
    pub recommended_exposure: Option<f64>,
    pub sentiment: Option<Sentiment>,
    pub phase: Option<MarketPhase>,
    /// Per-asset sentiment score in [0,1], keyed by base asset symbol
    /// (e.g. "BTC") with a "MARKET" fallback key for assets without their
    /// own entry.
    pub asset_sentiment: HashMap<String, f64>,
}

impl MacroSnapshot {
    /// Sentiment score for `base`, falling back to the market-wide key,
    /// `None` if neither is present.
    pub fn sentiment_for(&self, base: &str) -> Option<f64> {
        self.asset_sentiment
            .get(base)
            .or_else(|| self.asset_sentiment.get("MARKET"))
            .copied()
    }
}

/// Read-only macro data feed. Implementations talk to whatever upstream
/// (fear/greed index, dominance chart, on-chain aggregator) backs them;
/// failures should surface as `None`/empty snapshot rather than an error,
/// since a stale or absent macro read must never stall the cycle.
pub trait MacroProvider: Send + Sync {
    async fn fetch_snapshot(&self) -> MacroSnapshot;
}

/// A provider with nothing behind it. Useful as a default composition-root
/// wiring for deployments with no macro feed configured.
pub struct NullMacroProvider;

impl MacroProvider for NullMacroProvider {
    async fn fetch_snapshot(&self) -> MacroSnapshot {
        MacroSnapshot::default()
    }
}

pub struct MacroContext<P: MacroProvider> {
    provider: P,
    cached: RwLock<Option<(MacroSnapshot, Instant)>>,
}

impl<P: MacroProvider> MacroContext<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
        }
    }

    pub async fn snapshot(&self) -> MacroSnapshot {
        if let Some((snapshot, fetched_at)) = self.cached.read().clone() {
            if fetched_at.elapsed() < MACRO_TTL {
                return snapshot;
            }
        }

        let fresh = self.provider.fetch_snapshot().await;
        *self.cached.write() = Some((fresh.clone(), Instant::now()));
        fresh
    }
}
