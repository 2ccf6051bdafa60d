// =============================================================================
// MarketDataCache — short-TTL caching over the ExchangeGateway
// =============================================================================
//
// Keyed `(symbol, kind[, timeframe])` -> `(value, fetched_at)`. Accesses past
// TTL trigger a gateway fetch; failures propagate as `None` rather than a
// stale or synthesized default. The ring-buffer-style `RwLock<HashMap<..>>`
// bookkeeping mirrors the teacher's candle/orderbook managers; what changed
// is that entries are filled lazily by pulling from the gateway instead of
// being pushed by a websocket stream.

use crate::gateway::ExchangeGateway;
use crate::types::{Candle, OrderBookSnapshot, Symbol, Ticker, Timeframe};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const TICKER_TTL: Duration = Duration::from_secs(15);
const BOOK_TTL: Duration = Duration::from_secs(10);
const BOOK_DEPTH: u32 = 20;

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

pub struct MarketDataCache {
    tickers: RwLock<HashMap<Symbol, Entry<Ticker>>>,
    books: RwLock<HashMap<Symbol, Entry<OrderBookSnapshot>>>,
    candles: RwLock<HashMap<(Symbol, Timeframe), Entry<Vec<Candle>>>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self {
            tickers: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_ticker(&self, gateway: &impl ExchangeGateway, symbol: &Symbol) -> Option<Ticker> {
        if let Some(entry) = self.tickers.read().get(symbol) {
            if entry.fetched_at.elapsed() < TICKER_TTL {
                return Some(entry.value);
            }
        }

        let fetched = gateway.fetch_ticker(symbol).await.ok().flatten()?;
        self.tickers.write().insert(
            symbol.clone(),
            Entry {
                value: fetched,
                fetched_at: Instant::now(),
            },
        );
        debug!(symbol = %symbol, "ticker cache refreshed");
        Some(fetched)
    }

    pub async fn get_book(&self, gateway: &impl ExchangeGateway, symbol: &Symbol) -> Option<OrderBookSnapshot> {
        if let Some(entry) = self.books.read().get(symbol) {
            if entry.fetched_at.elapsed() < BOOK_TTL {
                return Some(entry.value.clone());
            }
        }

        let fetched = gateway.fetch_order_book(symbol, BOOK_DEPTH).await.ok().flatten()?;
        self.books.write().insert(
            symbol.clone(),
            Entry {
                value: fetched.clone(),
                fetched_at: Instant::now(),
            },
        );
        debug!(symbol = %symbol, "order book cache refreshed");
        Some(fetched)
    }

    pub async fn get_candles(
        &self,
        gateway: &impl ExchangeGateway,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> Option<Vec<Candle>> {
        let key = (symbol.clone(), timeframe);
        if let Some(entry) = self.candles.read().get(&key) {
            if entry.fetched_at.elapsed() < timeframe.bar_duration() {
                return Some(entry.value.clone());
            }
        }

        let fetched = gateway.fetch_candles(symbol, timeframe, limit).await.ok().flatten()?;
        self.candles.write().insert(
            key,
            Entry {
                value: fetched.clone(),
                fetched_at: Instant::now(),
            },
        );
        debug!(symbol = %symbol, timeframe = %timeframe, count = fetched.len(), "candle cache refreshed");
        Some(fetched)
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new()
    }
}
