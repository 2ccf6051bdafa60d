// =============================================================================
// MultiTimeframeAnalyzer — per-timeframe trend direction/strength, confluence
// =============================================================================
//
// Confluence is a direction-agreement ratio, not an average of strengths:
// it measures the weighted fraction of timeframes agreeing on direction.
// Implementations must not quietly revert to strength-averaging.

use crate::indicators::ema::calculate_ema;
use crate::types::{Candle, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeframeAnalysis {
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub strength: f64,
}

#[derive(Debug, Clone)]
pub struct ConfluenceReport {
    pub confluence: f64,
    pub dominant: Direction,
    pub timeframes: Vec<TimeframeAnalysis>,
    pub total_weight: f64,
}

const MIN_CLOSES: usize = 50;

/// EMA-alignment trend read for one timeframe's close series. Mirrors the
/// trend-strength step used by TokenRanker: compare price to EMA(8/21/50/200)
/// and take the majority-aligned direction, with strength = agreement ratio.
fn analyze_timeframe(timeframe: Timeframe, closes: &[f64]) -> Option<TimeframeAnalysis> {
    if closes.len() < MIN_CLOSES {
        return None;
    }
    let price = *closes.last()?;
    let periods = [8usize, 21, 50, 200];
    let mut checks = 0;
    let mut up = 0;
    let mut down = 0;
    for period in periods {
        if closes.len() < period {
            continue;
        }
        let ema = calculate_ema(closes, period);
        let Some(&last_ema) = ema.last() else { continue };
        checks += 1;
        if price > last_ema {
            up += 1;
        } else if price < last_ema {
            down += 1;
        }
    }
    if checks == 0 {
        return None;
    }

    let direction = if up > down {
        Direction::Up
    } else if down > up {
        Direction::Down
    } else {
        Direction::Sideways
    };
    let strength = up.max(down) as f64 / checks as f64;

    Some(TimeframeAnalysis {
        timeframe,
        direction,
        strength,
    })
}

/// Build a ConfluenceReport from per-timeframe candle series. Any timeframe
/// absent from `candles_by_timeframe`, or with fewer than 50 closes, drops
/// its weight out of `total_weight` entirely.
pub fn analyze(candles_by_timeframe: &[(Timeframe, Vec<Candle>)]) -> ConfluenceReport {
    let mut analyses = Vec::new();
    for (timeframe, candles) in candles_by_timeframe {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        if let Some(analysis) = analyze_timeframe(*timeframe, &closes) {
            analyses.push(analysis);
        }
    }

    let total_weight: f64 = analyses.iter().map(|a| a.timeframe.confluence_weight()).sum();
    let bullish: f64 = analyses
        .iter()
        .filter(|a| a.direction == Direction::Up)
        .map(|a| a.timeframe.confluence_weight())
        .sum();
    let bearish: f64 = analyses
        .iter()
        .filter(|a| a.direction == Direction::Down)
        .map(|a| a.timeframe.confluence_weight())
        .sum();

    let confluence = if total_weight > 0.0 {
        bullish.max(bearish) / total_weight
    } else {
        0.0
    };

    let dominant = if bullish > bearish {
        Direction::Up
    } else if bearish > bullish {
        Direction::Down
    } else {
        Direction::Sideways
    };

    ConfluenceReport {
        confluence,
        dominant,
        timeframes: analyses,
        total_weight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_closes(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    fn candles_from(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: i as i64,
                open: c,
                high: c * 1.001,
                low: c * 0.999,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn single_timeframe_present_uses_its_own_weight() {
        let closes = trending_closes(100.0, 1.0, 60);
        let report = analyze(&[(Timeframe::H1, candles_from(&closes))]);
        assert_eq!(report.total_weight, Timeframe::H1.confluence_weight());
        assert_eq!(report.confluence, 1.0);
        assert_eq!(report.dominant, Direction::Up);
    }

    #[test]
    fn empty_input_yields_zero_confluence() {
        let report = analyze(&[]);
        assert_eq!(report.confluence, 0.0);
        assert_eq!(report.total_weight, 0.0);
    }

    #[test]
    fn insufficient_closes_drops_timeframe_weight() {
        let closes = trending_closes(100.0, 1.0, 10);
        let report = analyze(&[(Timeframe::M5, candles_from(&closes))]);
        assert_eq!(report.total_weight, 0.0);
    }

    #[test]
    fn confluence_is_agreement_ratio_not_strength_average() {
        let up = trending_closes(100.0, 1.0, 60);
        let down = trending_closes(300.0, -1.0, 60);
        let report = analyze(&[
            (Timeframe::M5, candles_from(&up)),
            (Timeframe::H1, candles_from(&down)),
        ]);
        let bearish_weight = Timeframe::H1.confluence_weight();
        let total = Timeframe::M5.confluence_weight() + Timeframe::H1.confluence_weight();
        assert!((report.confluence - bearish_weight / total).abs() < 1e-9);
        assert_eq!(report.dominant, Direction::Down);
    }
}
