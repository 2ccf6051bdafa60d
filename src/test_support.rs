#![cfg(test)]
// =============================================================================
// FakeGateway — in-memory ExchangeGateway used across unit test modules
// =============================================================================
//
// Shared by token_ranker/position_store/cycle tests so each doesn't hand-roll
// its own stub. Every endpoint is backed by a plain in-memory map seeded by
// the test; call counters let a test assert a gateway method was (or wasn't)
// invoked, which is how the reconcile-throttling tests confirm the throttle
// actually skips the network round-trip rather than just checking a field.

use crate::gateway::ExchangeGateway;
use crate::types::{
    AlgoAck, AlgoOrder, BalanceInfo, Candle, Order, OrderAck, OrderBookSnapshot, Symbol, Ticker,
    Timeframe,
};
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct FakeGateway {
    pub symbols: RwLock<Vec<Symbol>>,
    pub tickers: RwLock<HashMap<Symbol, Ticker>>,
    pub books: RwLock<HashMap<Symbol, OrderBookSnapshot>>,
    pub candles: RwLock<HashMap<(Symbol, Timeframe), Vec<Candle>>>,
    pub balances: RwLock<HashMap<String, BalanceInfo>>,
    pub open_orders: RwLock<Vec<Order>>,
    pub algo_orders: RwLock<Vec<AlgoOrder>>,
    pub buy_calls: RwLock<Vec<(Symbol, f64)>>,
    pub oco_calls: RwLock<Vec<(Symbol, f64, f64, f64)>>,
    pub next_order_id: RwLock<u64>,
    pub fail_balance: RwLock<bool>,
    pub fail_algo_orders: RwLock<bool>,
    pub balance_call_count: RwLock<u32>,
    pub algo_call_count: RwLock<u32>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_symbols(&self, symbols: Vec<Symbol>) {
        *self.symbols.write() = symbols;
    }

    pub fn set_balance(&self, asset: &str, free: f64, total: f64) {
        self.balances.write().insert(asset.to_string(), BalanceInfo { free, total });
    }

    pub fn set_ticker(&self, symbol: &Symbol, last: f64) {
        self.tickers.write().insert(
            symbol.clone(),
            Ticker {
                last,
                high_24h: last * 1.02,
                low_24h: last * 0.98,
                quote_volume_24h: 1_000_000.0,
                percent_change_24h: 0.0,
                best_bid: last * 0.999,
                best_ask: last * 1.001,
            },
        );
    }

    pub fn set_candles(&self, symbol: &Symbol, timeframe: Timeframe, candles: Vec<Candle>) {
        self.candles.write().insert((symbol.clone(), timeframe), candles);
    }

    pub fn set_open_order(&self, symbol: &Symbol) {
        self.open_orders.write().push(Order {
            order_id: "regular-1".to_string(),
            symbol: symbol.clone(),
            side: "buy".to_string(),
            order_type: "limit".to_string(),
        });
    }

    pub fn set_algo_order(&self, symbol: &Symbol, state: &str) {
        self.algo_orders.write().push(AlgoOrder {
            algo_id: format!("algo-{symbol}"),
            symbol: symbol.clone(),
            state: state.to_string(),
        });
    }

    pub fn balance_calls(&self) -> u32 {
        *self.balance_call_count.read()
    }

    pub fn algo_calls(&self) -> u32 {
        *self.algo_call_count.read()
    }
}

impl ExchangeGateway for FakeGateway {
    async fn discover_liquid_symbols(
        &self,
        _min_quote_volume_usd: f64,
        _quote: &str,
        limit: u32,
    ) -> Result<Vec<Symbol>> {
        let mut symbols = self.symbols.read().clone();
        symbols.truncate(limit as usize);
        Ok(symbols)
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Option<Ticker>> {
        Ok(self.tickers.read().get(symbol).copied())
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        _limit: u32,
    ) -> Result<Option<Vec<Candle>>> {
        Ok(self.candles.read().get(&(symbol.clone(), timeframe)).cloned())
    }

    async fn fetch_order_book(&self, symbol: &Symbol, _depth: u32) -> Result<Option<OrderBookSnapshot>> {
        Ok(self.books.read().get(symbol).cloned())
    }

    async fn fetch_balance(&self) -> Result<HashMap<String, BalanceInfo>> {
        *self.balance_call_count.write() += 1;
        if *self.fail_balance.read() {
            anyhow::bail!("fake balance fetch failure");
        }
        Ok(self.balances.read().clone())
    }

    async fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        Ok(self.open_orders.read().clone())
    }

    async fn fetch_algo_orders(&self, _kind: &str, state: &str) -> Result<Vec<AlgoOrder>> {
        *self.algo_call_count.write() += 1;
        if *self.fail_algo_orders.read() {
            anyhow::bail!("fake algo order fetch failure");
        }
        Ok(self
            .algo_orders
            .read()
            .iter()
            .filter(|a| a.state == state)
            .cloned()
            .collect())
    }

    async fn place_market_buy(&self, symbol: &Symbol, base_amount: f64) -> Result<OrderAck> {
        self.buy_calls.write().push((symbol.clone(), base_amount));
        let mut id = self.next_order_id.write();
        *id += 1;
        Ok(OrderAck {
            order_id: format!("order-{id}"),
            filled_base: 0.0,
            avg_price: 0.0,
            status: "submitted".to_string(),
        })
    }

    async fn place_oco_sell(
        &self,
        symbol: &Symbol,
        base_amount: f64,
        stop_price: f64,
        take_profit_price: f64,
        _entry_price: f64,
    ) -> Result<AlgoAck> {
        self.oco_calls.write().push((symbol.clone(), base_amount, stop_price, take_profit_price));
        Ok(AlgoAck {
            algo_id: "fake-algo".to_string(),
            status: "live".to_string(),
            error_code: None,
        })
    }

    async fn cancel_algo_order(&self, _algo_id: &str) -> Result<()> {
        Ok(())
    }
}
