// =============================================================================
// RegimeDetector — classifies the current market regime from ADX + BBW
// =============================================================================
//
// Regime drives downstream parameter selection (TokenRanker weighting,
// DynamicOptimizer thresholds). Classification uses only two signals:
//   - ADX(14)              -> trend strength
//   - Bollinger Band Width -> volatility
// Direction for the trending case comes from EMA(9) slope, not ADX itself
// (ADX is directionless by construction).

use crate::indicators::adx::calculate_adx;
use crate::indicators::bollinger::calculate_bollinger;
use crate::indicators::ema::calculate_ema;
use crate::mathx::remap;
use crate::types::Candle;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

const ADX_PERIOD: usize = 14;
const BBW_PERIOD: usize = 20;
const BBW_STD: f64 = 2.0;

const ADX_TRENDING: f64 = 25.0;
const ADX_RANGING: f64 = 20.0;
const BBW_VOLATILE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Sideways,
    Volatile,
    Ranging,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Sideways => "sideways",
            Self::Volatile => "volatile",
            Self::Ranging => "ranging",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RegimeState {
    pub regime: MarketRegime,
    pub adx: f64,
    pub bbw: f64,
    /// Trend/volatility strength in [0, 1], how far past the classifying
    /// threshold the underlying reading sits.
    pub strength: f64,
    pub volatility_pct: f64,
    pub regime_age_secs: u64,
}

/// Classify a regime from already-computed ADX/BBW/EMA-slope readings.
/// Priority order: volatile first (can co-occur with a trend reading),
/// then trending (direction from EMA slope), then ranging, else sideways.
fn classify(adx: f64, bbw: f64, ema_slope_up: Option<bool>) -> (MarketRegime, f64) {
    if bbw > BBW_VOLATILE {
        let strength = remap(bbw, BBW_VOLATILE, BBW_VOLATILE * 2.0, 0.5, 1.0).clamp(0.0, 1.0);
        return (MarketRegime::Volatile, strength);
    }

    if adx > ADX_TRENDING {
        let strength = remap(adx, ADX_TRENDING, 50.0, 0.5, 1.0).clamp(0.0, 1.0);
        return match ema_slope_up {
            Some(true) => (MarketRegime::TrendingUp, strength),
            Some(false) => (MarketRegime::TrendingDown, strength),
            None => (MarketRegime::Sideways, strength * 0.5),
        };
    }

    if adx < ADX_RANGING {
        let strength = remap(adx, 0.0, ADX_RANGING, 1.0, 0.5).clamp(0.0, 1.0);
        return (MarketRegime::Ranging, strength);
    }

    (MarketRegime::Sideways, 0.30)
}

pub struct RegimeDetector {
    state: RwLock<Option<RegimeState>>,
    last_change_time: RwLock<Instant>,
}

impl RegimeDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        })
    }

    /// Compute a fresh `RegimeState` from 1h candles without storing it.
    pub fn detect(candles: &[Candle]) -> Option<RegimeState> {
        if candles.len() < 2 * ADX_PERIOD + 1 {
            return None;
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let adx = calculate_adx(candles, ADX_PERIOD)?;
        let bbw = calculate_bollinger(&closes, BBW_PERIOD, BBW_STD)?.width;

        let ema_slope_up = {
            let ema9 = calculate_ema(&closes, 9);
            if ema9.len() >= 2 {
                let last = ema9[ema9.len() - 1];
                let prev = ema9[ema9.len() - 2];
                Some(last > prev)
            } else {
                None
            }
        };

        let (regime, strength) = classify(adx, bbw, ema_slope_up);

        Some(RegimeState {
            regime,
            adx,
            bbw,
            strength,
            volatility_pct: bbw,
            regime_age_secs: 0,
        })
    }

    /// Recompute the regime from fresh candles and update stored state,
    /// tracking how long the current regime classification has persisted.
    pub fn update(self: &Arc<Self>, candles: &[Candle]) -> Option<RegimeState> {
        let mut fresh = Self::detect(candles)?;

        let mut state = self.state.write();
        let mut last_change = self.last_change_time.write();

        let changed = match state.as_ref() {
            Some(prev) => prev.regime != fresh.regime,
            None => true,
        };

        if changed {
            *last_change = Instant::now();
        }
        fresh.regime_age_secs = last_change.elapsed().as_secs();

        *state = Some(fresh.clone());
        Some(fresh)
    }

    pub fn current_regime(&self) -> Option<RegimeState> {
        self.state.read().clone()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        }
    }
}
