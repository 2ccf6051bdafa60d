// =============================================================================
// ExchangeGateway — the only boundary between the engine and the exchange
// =============================================================================
//
// The core compiles against this trait alone; `okx` is the one production
// implementation. Tests exercise the rest of the engine against an in-memory
// fake (see `FakeGateway` in `crate::test_support`) instead of a real network
// connection.

pub mod circuit_breaker;
pub mod okx;
pub mod rate_limit;

use crate::types::{
    AlgoAck, AlgoOrder, BalanceInfo, Candle, Order, OrderAck, OrderBookSnapshot, Symbol, Ticker,
    Timeframe,
};
use anyhow::Result;
use std::collections::HashMap;

/// The only boundary with the exchange. Implementations must keep regular
/// orders and algo orders in distinct return types — see `fetch_open_orders`
/// vs `fetch_algo_orders`.
pub trait ExchangeGateway: Send + Sync {
    async fn discover_liquid_symbols(
        &self,
        min_quote_volume_usd: f64,
        quote: &str,
        limit: u32,
    ) -> Result<Vec<Symbol>>;

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Option<Ticker>>;

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Option<Vec<Candle>>>;

    async fn fetch_order_book(&self, symbol: &Symbol, depth: u32) -> Result<Option<OrderBookSnapshot>>;

    async fn fetch_balance(&self) -> Result<HashMap<String, BalanceInfo>>;

    /// Regular (non-algo) open orders. Callers must not assume this includes
    /// algo/OCO/conditional/trigger orders — use `fetch_algo_orders` for those.
    async fn fetch_open_orders(&self) -> Result<Vec<Order>>;

    /// Live algo (OCO/conditional/trigger) orders. The only source of truth
    /// for whether a position is exchange-protected.
    async fn fetch_algo_orders(&self, kind: &str, state: &str) -> Result<Vec<AlgoOrder>>;

    async fn place_market_buy(&self, symbol: &Symbol, base_amount: f64) -> Result<OrderAck>;

    async fn place_oco_sell(
        &self,
        symbol: &Symbol,
        base_amount: f64,
        stop_price: f64,
        take_profit_price: f64,
        entry_price: f64,
    ) -> Result<AlgoAck>;

    async fn cancel_algo_order(&self, algo_id: &str) -> Result<()>;
}
