// =============================================================================
// Executor — places a market buy, confirms settlement, attaches OCO protection
// =============================================================================
//
// There is no true atomicity across buy + OCO. The only safe invariant is
// that once a Position is persisted, it accurately reflects whether OCO
// succeeded (`managed_by_exchange`). Steps 3-6 below must never be split by
// a cancellation without that invariant holding.

use crate::dynamic_optimizer::OptimizerParams;
use crate::errors::EngineError;
use crate::gateway::ExchangeGateway;
use crate::indicators::atr::calculate_atr;
use crate::position_store::{Position, PositionStore};
use crate::types::{Candle, Symbol};
use chrono::Utc;
use std::time::Duration;
use tracing::warn;

const SETTLEMENT_WAIT: Duration = Duration::from_secs(1);
const SETTLEMENT_TOLERANCE: f64 = 0.95;
const OCO_SELL_FRACTION: f64 = 0.999;
const ATR_PERIOD: usize = 14;

pub struct Executor;

impl Executor {
    /// Round `base_amount` down to the nearest multiple of `lot_step`, never
    /// producing a value below zero.
    fn floor_to_lot(base_amount: f64, lot_step: f64) -> f64 {
        if lot_step <= 0.0 {
            return base_amount;
        }
        (base_amount / lot_step).floor() * lot_step
    }

    pub async fn buy_then_protect<G: ExchangeGateway>(
        gateway: &G,
        store: &PositionStore,
        symbol: &Symbol,
        size_usd: f64,
        last_price: f64,
        lot_step: f64,
        hourly_candles: &[Candle],
        optimizer: OptimizerParams,
    ) -> Result<Position, EngineError> {
        if store.has(symbol) {
            crate::telemetry::duplicate_buy_prevented(symbol);
            return Err(EngineError::DuplicateBuyPrevented { symbol: symbol.clone() });
        }

        if last_price <= 0.0 {
            return Err(EngineError::Fatal("non-positive last price".to_string()));
        }
        let size_base = Self::floor_to_lot(size_usd / last_price, lot_step);
        if size_base <= 0.0 {
            return Err(EngineError::Fatal("rounded size is zero".to_string()));
        }

        // Defense in depth: re-check right before submit.
        if store.has(symbol) {
            crate::telemetry::duplicate_buy_prevented(symbol);
            return Err(EngineError::DuplicateBuyPrevented { symbol: symbol.clone() });
        }

        let ack = gateway
            .place_market_buy(symbol, size_base)
            .await
            .map_err(|e| EngineError::GatewayTransient {
                endpoint: "place_market_buy".to_string(),
                message: e.to_string(),
            })?;

        if ack.filled_base <= 0.0 {
            warn!(symbol = %symbol, order_id = %ack.order_id, "buy order recorded zero fill at submit time");
        }

        // Settlement confirmation: wait for the base asset balance to show
        // up before trusting the fill.
        tokio::time::sleep(SETTLEMENT_WAIT).await;
        let mut filled_base = Self::confirm_settlement(gateway, symbol).await;

        if filled_base < SETTLEMENT_TOLERANCE * size_base {
            tokio::time::sleep(SETTLEMENT_WAIT).await;
            filled_base = Self::confirm_settlement(gateway, symbol).await;
            if filled_base < SETTLEMENT_TOLERANCE * size_base && filled_base > 0.0 {
                warn!(
                    symbol = %symbol,
                    filled_base,
                    expected = size_base,
                    "settlement below tolerance after retry, proceeding with observed balance"
                );
            }
        }

        if filled_base <= 0.0 {
            warn!(symbol = %symbol, order_id = %ack.order_id, "no settled balance after buy; no position created");
            return Err(EngineError::DataAbsent {
                symbol: symbol.clone(),
                reason: "no settled balance observed after buy",
            });
        }

        let entry_price = if ack.avg_price > 0.0 { ack.avg_price } else { last_price };
        let atr = calculate_atr(hourly_candles, ATR_PERIOD);
        let (stop_loss, take_profit) = Self::compute_sl_tp(entry_price, atr, optimizer);

        let sell_amount = Self::floor_to_lot(filled_base * OCO_SELL_FRACTION, lot_step);

        let mut position = Position {
            symbol: symbol.clone(),
            side: "long".to_string(),
            amount: filled_base,
            entry_price,
            stop_loss,
            take_profit,
            entry_time: Utc::now().timestamp_millis() as f64 / 1000.0,
            order_id: ack.order_id.clone(),
            protection_algo_id: None,
            managed_by_exchange: false,
        };

        match gateway
            .place_oco_sell(symbol, sell_amount, stop_loss, take_profit, entry_price)
            .await
        {
            Ok(algo_ack) if algo_ack.error_code.is_none() => {
                position.protection_algo_id = Some(algo_ack.algo_id);
                position.managed_by_exchange = true;
            }
            Ok(algo_ack) => {
                crate::telemetry::protection_missing(
                    symbol,
                    algo_ack.error_code.as_deref().unwrap_or("oco rejected"),
                );
            }
            Err(e) => {
                crate::telemetry::protection_missing(symbol, &e.to_string());
            }
        }

        store
            .upsert_and_save(position.clone())
            .map_err(|e| EngineError::PersistenceError(e.to_string()))?;

        Ok(position)
    }

    async fn confirm_settlement<G: ExchangeGateway>(gateway: &G, symbol: &Symbol) -> f64 {
        match gateway.fetch_balance().await {
            Ok(balances) => balances.get(symbol.base()).map(|b| b.free).unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    fn compute_sl_tp(entry_price: f64, atr: Option<f64>, optimizer: OptimizerParams) -> (f64, f64) {
        let atr_value = atr.unwrap_or(entry_price * 0.01);
        let stop_distance = atr_value * optimizer.stop_loss_multiplier;
        let stop_loss = entry_price - stop_distance;
        let take_profit = entry_price + stop_distance * optimizer.take_profit_multiplier;
        (stop_loss, take_profit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_to_lot_rounds_down() {
        assert!((Executor::floor_to_lot(1.2345, 0.001) - 1.234).abs() < 1e-9);
    }

    #[test]
    fn floor_to_lot_ignores_zero_step() {
        assert_eq!(Executor::floor_to_lot(1.2345, 0.0), 1.2345);
    }

    #[test]
    fn compute_sl_tp_uses_atr_when_present() {
        let optimizer = OptimizerParams {
            base_confidence_threshold: 0.55,
            rsi_period: 14,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 2.5,
        };
        let (sl, tp) = Executor::compute_sl_tp(100.0, Some(2.0), optimizer);
        assert!((sl - 97.0).abs() < 1e-9);
        assert!((tp - 107.5).abs() < 1e-9);
    }

    #[test]
    fn compute_sl_tp_falls_back_without_atr() {
        let optimizer = OptimizerParams {
            base_confidence_threshold: 0.55,
            rsi_period: 14,
            stop_loss_multiplier: 1.5,
            take_profit_multiplier: 2.5,
        };
        let (sl, tp) = Executor::compute_sl_tp(100.0, None, optimizer);
        assert!(sl < 100.0);
        assert!(tp > 100.0);
    }
}
