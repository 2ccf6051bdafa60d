// =============================================================================
// DynamicOptimizer — regime-conditioned indicator/risk parameters
// =============================================================================
//
// Pure function of MarketRegime. No per-symbol learned state; the same
// regime always yields the same parameter set.

use crate::regime::MarketRegime;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerParams {
    pub base_confidence_threshold: f64,
    pub rsi_period: usize,
    pub stop_loss_multiplier: f64,
    pub take_profit_multiplier: f64,
}

pub fn params_for_regime(regime: MarketRegime) -> OptimizerParams {
    use MarketRegime::*;
    match regime {
        TrendingUp | TrendingDown => OptimizerParams {
            base_confidence_threshold: 0.55,
            rsi_period: 14,
            stop_loss_multiplier: 1.2,
            take_profit_multiplier: 3.0,
        },
        Sideways => OptimizerParams {
            base_confidence_threshold: 0.55,
            rsi_period: 18,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 2.5,
        },
        Volatile => OptimizerParams {
            base_confidence_threshold: 0.70,
            rsi_period: 14,
            stop_loss_multiplier: 2.0,
            take_profit_multiplier: 1.8,
        },
        Ranging => OptimizerParams {
            base_confidence_threshold: 0.60,
            rsi_period: 21,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 2.5,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trending_uses_tight_stop_and_wide_target() {
        let p = params_for_regime(MarketRegime::TrendingUp);
        assert_eq!(p.stop_loss_multiplier, 1.2);
        assert_eq!(p.take_profit_multiplier, 3.0);
    }

    #[test]
    fn volatile_uses_wide_stop_and_tight_target() {
        let p = params_for_regime(MarketRegime::Volatile);
        assert_eq!(p.stop_loss_multiplier, 2.0);
        assert_eq!(p.take_profit_multiplier, 1.8);
        assert_eq!(p.base_confidence_threshold, 0.70);
    }

    #[test]
    fn ranging_uses_longest_rsi_period() {
        let p = params_for_regime(MarketRegime::Ranging);
        assert_eq!(p.rsi_period, 21);
    }

    #[test]
    fn sideways_and_trending_share_confidence_threshold() {
        assert_eq!(
            params_for_regime(MarketRegime::Sideways).base_confidence_threshold,
            params_for_regime(MarketRegime::TrendingDown).base_confidence_threshold
        );
    }
}
