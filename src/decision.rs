// =============================================================================
// DecisionEngine — combine base signal + confluence + macro → {BUY, HOLD}
// =============================================================================

use crate::confluence::{ConfluenceReport, Direction};
use crate::dynamic_optimizer::OptimizerParams;
use crate::macro_context::MacroSnapshot;
use crate::mathx::clamp_finite;
use crate::types::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Hold,
}

/// Base trading signal, produced upstream from a symbol's TokenScore before
/// confluence/macro are folded in. SELL is out of scope: positions exit via
/// exchange-managed OCO, not an engine-issued sell.
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: Symbol,
    pub action: Action,
    pub base_confidence: Option<f64>,
}

impl Signal {
    /// A symbol that cleared TokenRanker's filters always proposes BUY;
    /// DecisionEngine is the actual gate. `base_confidence` mirrors the
    /// TokenScore total that earned the symbol its place in the ranking.
    pub fn from_token_score_total(symbol: Symbol, total: f64) -> Self {
        Self {
            symbol,
            action: Action::Buy,
            base_confidence: Some(total),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub symbol: Symbol,
    pub action: Action,
    pub combined_confidence: f64,
    pub required_confidence: f64,
    /// Advisory position size in quote-currency units; Executor applies the
    /// actual cap.
    pub size_usd_hint: Option<f64>,
}

const VOLATILITY_HIGH_PCT: f64 = 8.0;

pub struct DecisionEngine;

impl DecisionEngine {
    pub fn decide(
        signal: &Signal,
        confluence: &ConfluenceReport,
        macro_snapshot: &MacroSnapshot,
        optimizer: OptimizerParams,
        volatility_pct: f64,
    ) -> Decision {
        let Some(base_confidence) = signal.base_confidence else {
            return Decision {
                symbol: signal.symbol.clone(),
                action: Action::Hold,
                combined_confidence: 0.0,
                required_confidence: optimizer.base_confidence_threshold,
                size_usd_hint: None,
            };
        };

        let combined = 0.6 * base_confidence + 0.4 * confluence.confluence.min(1.0);

        let mut required = optimizer.base_confidence_threshold;
        if confluence.confluence < 0.40 {
            required *= 1.20;
        }
        if macro_snapshot.recommended_exposure.unwrap_or(0.0) < 0.50 {
            required *= 1.20;
        }
        if volatility_pct > VOLATILITY_HIGH_PCT {
            required *= 1.10;
        }
        required = clamp_finite(required, 0.15, 0.95);

        let action = if signal.action == Action::Buy
            && confluence.dominant != Direction::Down
            && combined >= required
        {
            Action::Buy
        } else {
            Action::Hold
        };

        Decision {
            symbol: signal.symbol.clone(),
            action,
            combined_confidence: combined,
            required_confidence: required,
            size_usd_hint: None,
        }
    }

    /// Position-size guard (advisory). `open_positions_slot` is the number of
    /// currently-occupied slots including the one about to be filled.
    pub fn position_size_usd(
        portfolio_equity: f64,
        recommended_exposure: Option<f64>,
        open_positions_slot: usize,
        liquidity: f64,
    ) -> Option<f64> {
        let exposure = recommended_exposure.unwrap_or(0.05).clamp(0.05, 0.30);
        let slots = open_positions_slot.max(1) as f64;
        let mut size_usd = portfolio_equity * exposure / slots;

        if liquidity < 0.3 {
            return None;
        }
        if liquidity < 0.5 {
            size_usd /= 2.0;
        }
        Some(size_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confluence::TimeframeAnalysis;
    use crate::types::Timeframe;

    fn report(confluence: f64, dominant: Direction) -> ConfluenceReport {
        ConfluenceReport {
            confluence,
            dominant,
            timeframes: vec![TimeframeAnalysis {
                timeframe: Timeframe::H1,
                direction: dominant,
                strength: 1.0,
            }],
            total_weight: 1.0,
        }
    }

    fn optimizer(threshold: f64) -> OptimizerParams {
        OptimizerParams {
            base_confidence_threshold: threshold,
            rsi_period: 14,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 2.5,
        }
    }

    #[test]
    fn scenario_s1_normal_buy() {
        let signal = Signal::from_token_score_total(Symbol::new("sol", "usdt"), 0.62);
        let confluence_report = report(0.80, Direction::Up);
        let macro_snapshot = MacroSnapshot {
            recommended_exposure: Some(0.8),
            ..Default::default()
        };
        let decision = DecisionEngine::decide(&signal, &confluence_report, &macro_snapshot, optimizer(0.55), 2.0);
        assert!((decision.combined_confidence - 0.692).abs() < 1e-9);
        assert_eq!(decision.action, Action::Buy);
    }

    #[test]
    fn missing_base_confidence_holds() {
        let signal = Signal {
            symbol: Symbol::new("sol", "usdt"),
            action: Action::Buy,
            base_confidence: None,
        };
        let decision = DecisionEngine::decide(&signal, &report(0.9, Direction::Up), &MacroSnapshot::default(), optimizer(0.55), 2.0);
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn bearish_dominant_blocks_buy() {
        let signal = Signal::from_token_score_total(Symbol::new("sol", "usdt"), 0.9);
        let decision = DecisionEngine::decide(
            &signal,
            &report(0.9, Direction::Down),
            &MacroSnapshot {
                recommended_exposure: Some(0.8),
                ..Default::default()
            },
            optimizer(0.55),
            2.0,
        );
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn low_confluence_widens_requirement_once() {
        let base = optimizer(0.55).base_confidence_threshold;
        let signal = Signal::from_token_score_total(Symbol::new("sol", "usdt"), 0.9);
        let decision = DecisionEngine::decide(
            &signal,
            &report(0.30, Direction::Up),
            &MacroSnapshot {
                recommended_exposure: Some(0.8),
                ..Default::default()
            },
            optimizer(0.55),
            2.0,
        );
        assert!((decision.required_confidence - base * 1.20).abs() < 1e-9);
    }

    #[test]
    fn absent_macro_exposure_widens_requirement() {
        let base = optimizer(0.55).base_confidence_threshold;
        let signal = Signal::from_token_score_total(Symbol::new("sol", "usdt"), 0.9);
        let decision = DecisionEngine::decide(&signal, &report(0.9, Direction::Up), &MacroSnapshot::default(), optimizer(0.55), 2.0);
        assert!((decision.required_confidence - base * 1.20).abs() < 1e-9);
    }

    #[test]
    fn position_size_rejects_below_liquidity_floor() {
        assert!(DecisionEngine::position_size_usd(10_000.0, Some(0.8), 1, 0.2).is_none());
    }

    #[test]
    fn position_size_halves_under_half_liquidity() {
        let full = DecisionEngine::position_size_usd(10_000.0, Some(0.3), 1, 0.9).unwrap();
        let halved = DecisionEngine::position_size_usd(10_000.0, Some(0.3), 1, 0.4).unwrap();
        assert!((halved - full / 2.0).abs() < 1e-9);
    }

    #[test]
    fn position_size_splits_across_slots() {
        let one_slot = DecisionEngine::position_size_usd(10_000.0, Some(0.3), 1, 0.9).unwrap();
        let two_slots = DecisionEngine::position_size_usd(10_000.0, Some(0.3), 2, 0.9).unwrap();
        assert!((two_slots - one_slot / 2.0).abs() < 1e-9);
    }
}
