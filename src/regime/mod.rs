// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Market regime classification from two quantitative indicators:
// - ADX (trend strength)
// - Bollinger Band Width (volatility expansion/contraction)

pub mod detector;

pub use detector::{MarketRegime, RegimeDetector, RegimeState};
