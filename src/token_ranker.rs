// =============================================================================
// TokenRanker — scores and orders candidate symbols for a trading cycle
// =============================================================================

use crate::errors::Absent;
use crate::gateway::ExchangeGateway;
use crate::indicators::ema::calculate_ema;
use crate::macro_context::MacroSnapshot;
use crate::market_data::MarketDataCache;
use crate::mathx::{remap, sigmoid};
use crate::regime::MarketRegime;
use crate::types::{OrderBookSnapshot, Symbol, Ticker, Timeframe};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const RANKING_TTL: Duration = Duration::from_secs(300);
const BOOK_DEPTH_LEVELS: usize = 20;
const DELTA_EVENT_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct TokenScore {
    pub liquidity: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub trend_strength: Absent<f64>,
    pub macro_sentiment: Absent<f64>,
    pub onchain_strength: Absent<f64>,
    pub risk: Absent<f64>,
    pub total: f64,
}

fn score_liquidity(book: &OrderBookSnapshot) -> Absent<f64> {
    if !book.is_valid() {
        return Absent::Absent("book malformed");
    }
    let bid0 = book.bids[0].price;
    let ask0 = book.asks[0].price;
    let mid = (bid0 + ask0) / 2.0;
    let spread = (ask0 - bid0) / mid;

    let bids = &book.bids[..book.bids.len().min(BOOK_DEPTH_LEVELS)];
    let asks = &book.asks[..book.asks.len().min(BOOK_DEPTH_LEVELS)];

    let bid_depth_usd: f64 = bids.iter().map(|l| l.price * l.size).sum();
    let ask_depth_usd: f64 = asks.iter().map(|l| l.price * l.size).sum();
    let depth_usd = bid_depth_usd + ask_depth_usd;
    if depth_usd <= 0.0 {
        return Absent::Absent("zero total depth");
    }

    let bid_vol: f64 = bids.iter().map(|l| l.size).sum();
    let ask_vol: f64 = asks.iter().map(|l| l.size).sum();
    let balance = if bid_vol.max(ask_vol) > 0.0 {
        bid_vol.min(ask_vol) / bid_vol.max(ask_vol)
    } else {
        0.0
    };

    let threshold = 0.001 * depth_usd;
    let mut cumulative = 0.0;
    let mut p_threshold = asks.last().map(|l| l.price).unwrap_or(ask0);
    for level in asks {
        cumulative += level.price * level.size;
        if cumulative >= threshold {
            p_threshold = level.price;
            break;
        }
    }
    let impact = (p_threshold - ask0).abs() / ask0;

    let score = 0.4 * (1.0 - (spread * 100.0).clamp(0.0, 1.0))
        + 0.3 * sigmoid(depth_usd.max(1.0).log10())
        + 0.2 * balance
        + 0.1 * (1.0 - (impact * 100.0).clamp(0.0, 1.0));

    Absent::Present(score.clamp(0.0, 1.0))
}

fn score_momentum(ticker: &Ticker, reference_volume: f64) -> f64 {
    let normalized = (ticker.percent_change_24h / 20.0).clamp(-1.0, 1.0);
    let volume_boost = if reference_volume > 0.0 {
        (ticker.quote_volume_24h / reference_volume).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (0.8 * normalized + 0.2 * volume_boost).clamp(-1.0, 1.0)
}

fn score_volatility(ticker: &Ticker) -> Absent<f64> {
    if ticker.high_24h <= 0.0 || ticker.low_24h <= 0.0 || ticker.last <= 0.0 {
        return Absent::Absent("non-positive price field");
    }
    if ticker.high_24h < ticker.low_24h {
        return Absent::Absent("high below low");
    }
    let raw = (ticker.high_24h - ticker.low_24h) / ticker.last;
    let pct = raw * 100.0;
    // Trapezoid: ramps up to the 2-8% plateau, decays outside it.
    let score = if pct < 2.0 {
        remap(pct, 0.0, 2.0, 0.0, 1.0)
    } else if pct <= 8.0 {
        1.0
    } else {
        remap(pct, 8.0, 20.0, 1.0, 0.0)
    };
    Absent::Present(score.clamp(0.0, 1.0))
}

fn score_trend_strength(daily_closes: &[f64]) -> Absent<f64> {
    if daily_closes.len() < 50 {
        return Absent::Absent("fewer than 50 daily candles");
    }
    let price = *daily_closes.last().unwrap();
    let periods = [8usize, 21, 50, 200];
    let mut checks = 0;
    let mut aligned_up = 0;
    let mut aligned_down = 0;
    for period in periods {
        if daily_closes.len() < period {
            continue;
        }
        let ema = calculate_ema(daily_closes, period);
        let Some(&last_ema) = ema.last() else { continue };
        checks += 1;
        if price > last_ema {
            aligned_up += 1;
        } else if price < last_ema {
            aligned_down += 1;
        }
    }
    if checks == 0 {
        return Absent::Absent("no EMA computable");
    }
    let dominant = aligned_up.max(aligned_down);
    let sign = if aligned_up >= aligned_down { 1.0 } else { -1.0 };
    Absent::Present(sign * dominant as f64 / checks as f64)
}

fn score_macro_sentiment(macro_snapshot: &MacroSnapshot, base: &str, momentum: f64) -> Absent<f64> {
    let Some(base_value) = macro_snapshot.sentiment_for(base) else {
        return Absent::Absent("macro map lacks asset and market key");
    };
    let mut adjusted = base_value;
    if momentum > 0.6 {
        adjusted = (adjusted + 0.15).min(0.9);
    } else if momentum < 0.4 {
        adjusted = (adjusted - 0.15).max(0.1);
    }
    Absent::Present(adjusted.clamp(0.0, 1.0))
}

fn score_risk(volatility: Absent<f64>, liquidity: Absent<f64>) -> Absent<f64> {
    match (volatility, liquidity) {
        (Absent::Present(v), Absent::Present(l)) => Absent::Present((v * 0.6 + (1.0 - l) * 0.4).clamp(0.0, 1.0)),
        _ => Absent::Absent("volatility or liquidity absent"),
    }
}

fn regime_weights(regime: MarketRegime) -> [f64; 6] {
    // [liquidity, momentum, macro_sentiment, onchain, volatility, trend]
    let base = [0.25, 0.30, 0.15, 0.10, 0.10, 0.10];
    use MarketRegime::*;
    let delta = match regime {
        TrendingUp | TrendingDown => [-0.10, 0.10, -0.10, 0.0, 0.0, 0.10],
        Volatile => [0.15, -0.15, 0.0, 0.0, 0.10, -0.10],
        Ranging | Sideways => [0.0, -0.10, 0.10, 0.0, 0.05, -0.05],
    };
    let mut out = base;
    for i in 0..6 {
        out[i] += delta[i];
    }
    out
}

fn component_or_neutral(component: Absent<f64>) -> f64 {
    component.unwrap_or(0.5)
}

pub struct RankedEntry {
    pub symbol: Symbol,
    pub score: TokenScore,
}

struct CachedRanking {
    fetched_at: Instant,
    candidate_key: Vec<Symbol>,
    entries: Vec<RankedEntry>,
    totals: HashMap<Symbol, f64>,
}

pub struct TokenRanker {
    min_liquidity: f64,
    cache: RwLock<Option<CachedRanking>>,
}

impl TokenRanker {
    pub fn new(min_liquidity: f64) -> Self {
        Self {
            min_liquidity,
            cache: RwLock::new(None),
        }
    }

    /// Score and rank `candidates`, returning at most `top_n` entries ordered
    /// by descending total score. Ranking-change events fire for symbols
    /// whose total moved by more than 0.10 since the previous cached result.
    pub async fn rank<G: ExchangeGateway>(
        &self,
        gateway: &G,
        cache: &MarketDataCache,
        candidates: &[Symbol],
        regime: MarketRegime,
        macro_snapshot: &MacroSnapshot,
        top_n: usize,
    ) -> Vec<RankedEntry> {
        let mut sorted_candidates = candidates.to_vec();
        sorted_candidates.sort();

        if let Some(cached) = self.cache.read().as_ref() {
            if cached.fetched_at.elapsed() < RANKING_TTL && cached.candidate_key == sorted_candidates {
                return cached
                    .entries
                    .iter()
                    .take(top_n)
                    .map(|e| RankedEntry {
                        symbol: e.symbol.clone(),
                        score: e.score,
                    })
                    .collect();
            }
        }

        let reference_volume = 50_000_000.0;
        let weights = regime_weights(regime);

        let mut scored = Vec::new();
        for symbol in &sorted_candidates {
            let Some(ticker) = cache.get_ticker(gateway, symbol).await else {
                continue;
            };
            let Some(book) = cache.get_book(gateway, symbol).await else {
                continue;
            };
            let daily = cache.get_candles(gateway, symbol, Timeframe::D1, 220).await;
            let closes: Vec<f64> = daily.unwrap_or_default().iter().map(|c| c.close).collect();

            let liquidity = score_liquidity(&book);
            let momentum = score_momentum(&ticker, reference_volume);
            let volatility = score_volatility(&ticker);

            let (Absent::Present(liquidity_v), Absent::Present(volatility_v)) = (liquidity, volatility) else {
                continue;
            };

            let trend_strength = score_trend_strength(&closes);
            let macro_sentiment = score_macro_sentiment(macro_snapshot, symbol.base(), momentum);
            let onchain_strength: Absent<f64> = Absent::Absent("no on-chain provider configured");
            let risk = score_risk(volatility, liquidity);

            let components = [
                liquidity_v,
                // momentum is signed [-1,1]; for the weighted total we use its
                // magnitude-preserving value directly, matching the spec's
                // "negative allowed" note.
                momentum,
                component_or_neutral(macro_sentiment),
                component_or_neutral(onchain_strength),
                volatility_v,
                component_or_neutral(trend_strength),
            ];

            let base_total: f64 = components.iter().zip(weights.iter()).map(|(c, w)| c * w).sum();
            let risk_adjustment = match risk {
                Absent::Present(r) => 1.0 - (r - 0.5) * 0.3,
                Absent::Absent(_) => 1.0,
            };
            let total = (base_total * risk_adjustment).clamp(0.0, 1.0);

            if liquidity_v < self.min_liquidity {
                continue;
            }

            scored.push(RankedEntry {
                symbol: symbol.clone(),
                score: TokenScore {
                    liquidity: liquidity_v,
                    momentum,
                    volatility: volatility_v,
                    trend_strength,
                    macro_sentiment,
                    onchain_strength,
                    risk,
                    total,
                },
            });
        }

        scored.sort_by(|a, b| b.score.total.partial_cmp(&a.score.total).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(previous) = self.cache.read().as_ref() {
            for entry in scored.iter().take(top_n) {
                if let Some(&prev_total) = previous.totals.get(&entry.symbol) {
                    if (entry.score.total - prev_total).abs() > DELTA_EVENT_THRESHOLD {
                        crate::telemetry::ranking_changed(&entry.symbol, prev_total, entry.score.total);
                    }
                }
            }
        }

        let totals: HashMap<Symbol, f64> = scored.iter().map(|e| (e.symbol.clone(), e.score.total)).collect();
        let result: Vec<RankedEntry> = scored
            .into_iter()
            .take(top_n)
            .map(|e| RankedEntry {
                symbol: e.symbol,
                score: e.score,
            })
            .collect();

        *self.cache.write() = Some(CachedRanking {
            fetched_at: Instant::now(),
            candidate_key: sorted_candidates,
            entries: result
                .iter()
                .map(|e| RankedEntry {
                    symbol: e.symbol.clone(),
                    score: e.score,
                })
                .collect(),
            totals,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;

    fn ticker(last: f64, high: f64, low: f64, change: f64, vol: f64) -> Ticker {
        Ticker {
            last,
            high_24h: high,
            low_24h: low,
            quote_volume_24h: vol,
            percent_change_24h: change,
            best_bid: last * 0.999,
            best_ask: last * 1.001,
        }
    }

    fn book(bid: f64, ask: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: vec![BookLevel { price: bid, size: 10.0 }],
            asks: vec![BookLevel { price: ask, size: 10.0 }],
            timestamp: 0,
        }
    }

    #[test]
    fn liquidity_absent_on_crossed_book() {
        let crossed = book(101.0, 100.0);
        assert!(matches!(score_liquidity(&crossed), Absent::Absent(_)));
    }

    #[test]
    fn liquidity_present_on_sane_book() {
        let b = book(100.0, 100.2);
        assert!(matches!(score_liquidity(&b), Absent::Present(_)));
    }

    #[test]
    fn volatility_absent_on_inverted_high_low() {
        let t = ticker(100.0, 90.0, 110.0, 0.0, 1_000_000.0);
        assert!(matches!(score_volatility(&t), Absent::Absent(_)));
    }

    #[test]
    fn volatility_peaks_in_plateau() {
        let t = ticker(100.0, 104.0, 96.0, 0.0, 1_000_000.0);
        assert_eq!(score_volatility(&t).present(), Some(1.0));
    }

    #[test]
    fn momentum_clamped_to_unit_range() {
        let t = ticker(100.0, 110.0, 90.0, 200.0, 1_000_000.0);
        let m = score_momentum(&t, 1_000_000.0);
        assert!(m <= 1.0);
    }

    #[test]
    fn trend_strength_absent_without_enough_history() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        assert!(matches!(score_trend_strength(&closes), Absent::Absent(_)));
    }

    #[test]
    fn risk_absent_if_either_input_absent() {
        assert!(matches!(
            score_risk(Absent::Absent("x"), Absent::Present(0.5)),
            Absent::Absent(_)
        ));
    }

    #[test]
    fn regime_weights_sum_changes_are_consistent() {
        let trending = regime_weights(MarketRegime::TrendingUp);
        let ranging = regime_weights(MarketRegime::Ranging);
        assert!(trending[1] > ranging[1]); // momentum weighted higher in trends
    }

    #[tokio::test]
    async fn rank_scores_and_orders_candidates_against_a_fake_gateway() {
        use crate::test_support::FakeGateway;

        let gateway = FakeGateway::new();
        let btc = Symbol::from("BTC/USDT");
        let eth = Symbol::from("ETH/USDT");
        gateway.set_ticker(&btc, 50_000.0);
        gateway.set_ticker(&eth, 3_000.0);
        gateway.set_symbols(vec![btc.clone(), eth.clone()]);
        // BTC gets a tight book (high liquidity); ETH a wider one.
        gateway.books.write().insert(
            btc.clone(),
            OrderBookSnapshot {
                bids: vec![BookLevel { price: 49_999.0, size: 10.0 }],
                asks: vec![BookLevel { price: 50_001.0, size: 10.0 }],
                timestamp: 0,
            },
        );
        gateway.books.write().insert(
            eth.clone(),
            OrderBookSnapshot {
                bids: vec![BookLevel { price: 2_990.0, size: 10.0 }],
                asks: vec![BookLevel { price: 3_010.0, size: 10.0 }],
                timestamp: 0,
            },
        );

        let cache = MarketDataCache::new();
        let ranker = TokenRanker::new(0.0);
        let macro_snapshot = crate::macro_context::MacroSnapshot::default();

        let ranked = ranker
            .rank(&gateway, &cache, &[btc.clone(), eth.clone()], MarketRegime::Sideways, &macro_snapshot, 10)
            .await;

        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].score.total >= ranked[1].score.total);
    }

    #[tokio::test]
    async fn rank_skips_candidates_with_no_ticker() {
        use crate::test_support::FakeGateway;

        let gateway = FakeGateway::new();
        let untracked = Symbol::from("DOGE/USDT");
        let cache = MarketDataCache::new();
        let ranker = TokenRanker::new(0.0);
        let macro_snapshot = crate::macro_context::MacroSnapshot::default();

        let ranked = ranker
            .rank(&gateway, &cache, &[untracked], MarketRegime::Sideways, &macro_snapshot, 10)
            .await;

        assert!(ranked.is_empty());
    }
}
