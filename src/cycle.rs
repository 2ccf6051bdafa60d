// =============================================================================
// CycleScheduler — drives one trading cycle every `polling_interval_seconds`
// =============================================================================
//
// Per-symbol work proceeds sequentially within a cycle (no tokio::spawn):
// this keeps every gateway call funneled through one RateLimiter without
// needing a boxed/object-safe ExchangeGateway. Ordering within one symbol
// ("reconcile -> discover -> rank -> analyze -> decide -> execute -> persist")
// is a hard requirement, not an optimization target.

use crate::confluence;
use crate::decision::{Action, Decision, DecisionEngine, Signal};
use crate::dynamic_optimizer::params_for_regime;
use crate::executor::Executor;
use crate::gateway::ExchangeGateway;
use crate::macro_context::{MacroContext, MacroProvider};
use crate::market_data::MarketDataCache;
use crate::position_store::PositionStore;
use crate::regime::{MarketRegime, RegimeDetector};
use crate::token_ranker::TokenRanker;
use crate::types::{Symbol, Timeframe};
use std::sync::Arc;
use std::time::Instant;

pub struct CycleConfig {
    pub quote: String,
    pub min_quote_volume_usd: f64,
    pub discover_limit: u32,
    pub top_n_analyzed: usize,
    pub min_liquidity: f64,
    pub max_concurrent_positions: usize,
    pub portfolio_equity: f64,
    pub default_lot_step: f64,
}

pub struct CycleScheduler<G: ExchangeGateway, P: MacroProvider> {
    gateway: Arc<G>,
    cache: Arc<MarketDataCache>,
    ranker: Arc<TokenRanker>,
    regime_detector: Arc<RegimeDetector>,
    macro_context: Arc<MacroContext<P>>,
    store: Arc<PositionStore>,
    config: CycleConfig,
}

pub struct CycleSummary {
    pub symbols_considered: usize,
    pub decisions_made: usize,
    pub executions: usize,
}

impl<G: ExchangeGateway, P: MacroProvider> CycleScheduler<G, P> {
    pub fn new(
        gateway: Arc<G>,
        cache: Arc<MarketDataCache>,
        ranker: Arc<TokenRanker>,
        regime_detector: Arc<RegimeDetector>,
        macro_context: Arc<MacroContext<P>>,
        store: Arc<PositionStore>,
        config: CycleConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            ranker,
            regime_detector,
            macro_context,
            store,
            config,
        }
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let started = Instant::now();

        if let Err(e) = self.store.reconcile(self.gateway.as_ref(), false).await {
            crate::telemetry::gateway_error("reconcile", "persistence_error", &e.to_string());
            crate::telemetry::cycle_summary(0, 0, 0, started.elapsed().as_millis());
            return CycleSummary {
                symbols_considered: 0,
                decisions_made: 0,
                executions: 0,
            };
        }

        let candidates = match self
            .gateway
            .discover_liquid_symbols(self.config.min_quote_volume_usd, &self.config.quote, self.config.discover_limit)
            .await
        {
            Ok(symbols) => symbols,
            Err(_) => {
                crate::telemetry::cycle_summary(0, 0, 0, started.elapsed().as_millis());
                return CycleSummary {
                    symbols_considered: 0,
                    decisions_made: 0,
                    executions: 0,
                };
            }
        };

        // Regime is derived once per cycle from a representative symbol's
        // hourly candles (the first liquid candidate), if any.
        let regime = self.detect_regime(&candidates).await;
        let macro_snapshot = self.macro_context.snapshot().await;

        let ranked = self
            .ranker
            .rank(
                self.gateway.as_ref(),
                &self.cache,
                &candidates,
                regime,
                &macro_snapshot,
                self.config.top_n_analyzed,
            )
            .await;

        let mut decisions_made = 0usize;
        let mut executions = 0usize;

        for entry in &ranked {
            if self.store.has(&entry.symbol) {
                crate::telemetry::position_held(&entry.symbol);
                continue; // HOLD: already tracked.
            }

            let Some(decision) = self.analyze_and_decide(&entry.symbol, entry.score.total, regime, &macro_snapshot).await else {
                continue;
            };
            decisions_made += 1;

            if decision.action != Action::Buy {
                continue;
            }

            let free_slots = self
                .config
                .max_concurrent_positions
                .saturating_sub(self.store.open_count());
            if free_slots == 0 {
                continue;
            }

            if self.try_execute(&entry.symbol, entry.score.liquidity, &macro_snapshot, regime, &decision).await {
                executions += 1;
            }
        }

        let summary = CycleSummary {
            symbols_considered: ranked.len(),
            decisions_made,
            executions,
        };
        crate::telemetry::cycle_summary(
            summary.symbols_considered,
            summary.decisions_made,
            summary.executions,
            started.elapsed().as_millis(),
        );
        summary
    }

    async fn detect_regime(&self, candidates: &[Symbol]) -> MarketRegime {
        for symbol in candidates.iter().take(3) {
            if let Some(candles) = self.cache.get_candles(self.gateway.as_ref(), symbol, Timeframe::H1, 100).await {
                if let Some(state) = self.regime_detector.update(&candles) {
                    return state.regime;
                }
            }
        }
        self.regime_detector
            .current_regime()
            .map(|s| s.regime)
            .unwrap_or(MarketRegime::Sideways)
    }

    async fn analyze_and_decide(
        &self,
        symbol: &Symbol,
        base_confidence: f64,
        regime: MarketRegime,
        macro_snapshot: &crate::macro_context::MacroSnapshot,
    ) -> Option<Decision> {
        let mut per_timeframe = Vec::new();
        for timeframe in Timeframe::ALL {
            if let Some(candles) = self.cache.get_candles(self.gateway.as_ref(), symbol, timeframe, 260).await {
                per_timeframe.push((timeframe, candles));
            }
        }
        let report = confluence::analyze(&per_timeframe);

        let hourly = per_timeframe
            .iter()
            .find(|(tf, _)| *tf == Timeframe::H1)
            .map(|(_, c)| c.clone())
            .unwrap_or_default();
        let volatility_pct = RegimeDetector::detect(&hourly).map(|s| s.volatility_pct).unwrap_or(0.0);

        let signal = Signal::from_token_score_total(symbol.clone(), base_confidence);
        let optimizer = params_for_regime(regime);

        if report.total_weight == 0.0 {
            return None;
        }
        Some(DecisionEngine::decide(&signal, &report, macro_snapshot, optimizer, volatility_pct))
    }

    async fn try_execute(
        &self,
        symbol: &Symbol,
        liquidity: f64,
        macro_snapshot: &crate::macro_context::MacroSnapshot,
        regime: MarketRegime,
        decision: &Decision,
    ) -> bool {
        let Some(ticker) = self.cache.get_ticker(self.gateway.as_ref(), symbol).await else {
            return false;
        };
        let Some(size_usd) = DecisionEngine::position_size_usd(
            self.config.portfolio_equity,
            macro_snapshot.recommended_exposure,
            self.store.open_count() + 1,
            liquidity,
        ) else {
            return false;
        };
        let hourly = self
            .cache
            .get_candles(self.gateway.as_ref(), symbol, Timeframe::H1, 100)
            .await
            .unwrap_or_default();
        let optimizer = params_for_regime(regime);
        let _ = decision;

        Executor::buy_then_protect(
            self.gateway.as_ref(),
            self.store.as_ref(),
            symbol,
            size_usd,
            ticker.last,
            self.config.default_lot_step,
            &hourly,
            optimizer,
        )
        .await
        .is_ok()
    }
}
