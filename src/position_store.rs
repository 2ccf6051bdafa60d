// =============================================================================
// PositionStore — authoritative in-memory map of tracked positions
// =============================================================================
//
// Startup load order, reconciliation throttling, and the atomic temp+rename
// persistence pattern are all part of the observable contract: get any of
// them wrong and a restart either double-trades or leaks an unprotected
// holding. See S4/S5/S6 in the design notes for the scenarios this guards.

use crate::gateway::ExchangeGateway;
use crate::market_data::MarketDataCache;
use crate::types::Symbol;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

const RECONCILE_MIN_INTERVAL: Duration = Duration::from_secs(60);
const MIN_NOTIONAL_USD: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Always "long"; the engine has no short-selling path.
    pub side: String,
    pub amount: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_time: f64,
    pub order_id: String,
    #[serde(default)]
    pub protection_algo_id: Option<String>,
    #[serde(default)]
    pub managed_by_exchange: bool,
}

pub struct PositionStore {
    path: PathBuf,
    positions: RwLock<HashMap<Symbol, Position>>,
    last_reconcile: RwLock<Option<Instant>>,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: RwLock::new(HashMap::new()),
            last_reconcile: RwLock::new(None),
        }
    }

    pub fn has(&self, symbol: &Symbol) -> bool {
        self.positions.read().contains_key(symbol)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.positions.read().len()
    }

    /// Read the persisted file, if any. Absence of the file is not an error
    /// — it means a fresh install.
    fn read_persisted(&self) -> Result<HashMap<Symbol, Position>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read position store from {}", self.path.display()))?;
        let positions: HashMap<Symbol, Position> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse position store from {}", self.path.display()))?;
        Ok(positions)
    }

    /// Atomic write: temp file + rename, never a partial file on disk.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.positions.read().clone();
        let content = serde_json::to_string_pretty(&snapshot).context("failed to serialize position store")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp position store to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp position store to {}", self.path.display()))?;
        Ok(())
    }

    pub fn upsert_and_save(&self, position: Position) -> Result<()> {
        let symbol = position.symbol.clone();
        self.positions.write().insert(symbol.clone(), position);
        self.save()?;
        crate::telemetry::position_persisted(&symbol);
        Ok(())
    }

    /// Four-step startup load per the PositionStore contract:
    /// balances -> provisional positions, regular orders -> symbols, persisted
    /// file cross-checked against live algo orders, algo-orders fetch.
    pub async fn load<G: ExchangeGateway>(&self, gateway: &G, cache: &MarketDataCache) -> Result<()> {
        let balances = gateway.fetch_balance().await?;
        let persisted = self.read_persisted()?;
        let live_algo = gateway.fetch_algo_orders("oco", "live").await?;
        let algo_symbols: std::collections::HashSet<Symbol> =
            live_algo.iter().map(|a| a.symbol.clone()).collect();
        let open_orders = gateway.fetch_open_orders().await?;

        let mut loaded = HashMap::new();

        // Step 3/4: persisted entries with a live algo order are restored in
        // full, entry price from the file taking precedence over balance.
        for (symbol, position) in persisted {
            if algo_symbols.contains(&symbol) {
                loaded.insert(symbol.clone(), position);
                crate::telemetry::position_loaded(&symbol, "persisted+algo");
            } else if let Some(balance) = balances.get(symbol.base()) {
                if balance.free > 0.0 {
                    // Balance survives without a live algo: keep the record
                    // but flag it as exchange-unprotected until reconciled.
                    let mut restored = position;
                    restored.managed_by_exchange = false;
                    loaded.insert(symbol.clone(), restored);
                    crate::telemetry::position_loaded(&symbol, "persisted+balance_no_algo");
                    crate::telemetry::protection_missing(&symbol, "no live algo order found at startup");
                }
                // else: closed position, skip (no balance, no algo).
            }
        }

        // Step 1: provisional positions from free balances not already covered.
        for (asset, balance) in &balances {
            if balance.free <= 0.0 {
                continue;
            }
            if asset.eq_ignore_ascii_case("USDT") {
                continue; // the quote currency itself is never a position.
            }
            let symbol = Symbol::new(asset, "USDT");
            if loaded.contains_key(&symbol) {
                continue;
            }
            // Below the $1 notional floor, or no ticker to price it with:
            // skip rather than synthesize a position with a fabricated price.
            let Some(ticker) = cache.get_ticker(gateway, &symbol).await else {
                continue;
            };
            if balance.free * ticker.last < MIN_NOTIONAL_USD {
                continue;
            }
            loaded.insert(
                symbol.clone(),
                Position {
                    symbol: symbol.clone(),
                    side: "long".to_string(),
                    amount: balance.free,
                    entry_price: ticker.last,
                    stop_loss: 0.0,
                    take_profit: 0.0,
                    entry_time: 0.0,
                    order_id: String::new(),
                    protection_algo_id: None,
                    managed_by_exchange: algo_symbols.contains(&symbol),
                },
            );
            crate::telemetry::position_loaded(&symbol, "balance_provisional");
        }

        // Step 2: regular open orders add symbols not yet tracked, but never
        // get folded into the algo-order set (order type discrimination).
        for order in &open_orders {
            if !loaded.contains_key(&order.symbol) {
                info!(symbol = %order.symbol, kind = "open_order_seen", "regular open order with no tracked position");
            }
        }

        *self.positions.write() = loaded;
        Ok(())
    }

    /// Reconciliation, throttled to once per 60s unless `force`.
    pub async fn reconcile<G: ExchangeGateway>(&self, gateway: &G, force: bool) -> Result<()> {
        if !force {
            let last = *self.last_reconcile.read();
            if let Some(last) = last {
                if last.elapsed() < RECONCILE_MIN_INTERVAL {
                    return Ok(());
                }
            }
        }

        let symbols: Vec<Symbol> = self.positions.read().keys().cloned().collect();
        if symbols.is_empty() {
            *self.last_reconcile.write() = Some(Instant::now());
            return Ok(());
        }

        let balances = gateway.fetch_balance().await?;
        let live_algo = gateway.fetch_algo_orders("oco", "live").await?;
        let algo_symbols: std::collections::HashSet<Symbol> =
            live_algo.iter().map(|a| a.symbol.clone()).collect();

        let mut evicted = Vec::new();
        {
            let mut positions = self.positions.write();
            for symbol in &symbols {
                let free_balance = balances.get(symbol.base()).map(|b| b.free).unwrap_or(0.0);
                let has_live_algo = algo_symbols.contains(symbol);

                if free_balance == 0.0 && !has_live_algo {
                    positions.remove(symbol);
                    evicted.push(symbol.clone());
                } else {
                    crate::telemetry::position_reconciled(symbol, free_balance, has_live_algo);
                }
            }
        }

        for symbol in &evicted {
            crate::telemetry::position_evicted(symbol, "zero balance and no live algo order");
        }

        if !evicted.is_empty() {
            self.save()?;
        }

        *self.last_reconcile.write() = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn position(symbol: &str) -> Position {
        Position {
            symbol: Symbol::from(symbol),
            side: "long".to_string(),
            amount: 1.0,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            entry_time: 0.0,
            order_id: "abc".to_string(),
            protection_algo_id: Some("algo-1".to_string()),
            managed_by_exchange: true,
        }
    }

    #[test]
    fn upsert_and_save_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let store = PositionStore::new(&path);
        store.upsert_and_save(position("BTC/USDT")).unwrap();

        let reloaded = store.read_persisted().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains_key(&Symbol::from("BTC/USDT")));
    }

    #[test]
    fn has_reflects_in_memory_state() {
        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let symbol = Symbol::from("ETH/USDT");
        assert!(!store.has(&symbol));
        store.upsert_and_save(position("ETH/USDT")).unwrap();
        assert!(store.has(&symbol));
    }

    #[tokio::test]
    async fn reconcile_is_throttled_without_force() {
        use crate::test_support::FakeGateway;

        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        store.upsert_and_save(position("BTC/USDT")).unwrap();
        *store.last_reconcile.write() = Some(Instant::now());

        let gateway = FakeGateway::new();
        // No balance/algo seeded: if the throttle is bypassed, the symbol
        // would be evicted (zero balance, no algo order).
        store.reconcile(&gateway, false).await.unwrap();

        assert!(store.has(&Symbol::from("BTC/USDT")));
        assert_eq!(gateway.balance_calls(), 0);
    }

    /// S6: a forced reconcile within the throttle window still runs.
    #[tokio::test]
    async fn reconcile_force_bypasses_throttle() {
        use crate::test_support::FakeGateway;

        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        store.upsert_and_save(position("BTC/USDT")).unwrap();
        *store.last_reconcile.write() = Some(Instant::now());

        let gateway = FakeGateway::new();
        store.reconcile(&gateway, true).await.unwrap();

        assert_eq!(gateway.balance_calls(), 1);
    }

    /// S4: once the protective OCO has filled (no live algo order left) and
    /// the base balance has gone to zero, reconcile must evict the position.
    #[tokio::test]
    async fn reconcile_evicts_position_after_take_profit_fill() {
        use crate::test_support::FakeGateway;

        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let symbol = Symbol::from("SOL/USDT");
        store.upsert_and_save(position("SOL/USDT")).unwrap();

        let gateway = FakeGateway::new();
        gateway.set_balance("SOL", 0.0, 0.0);
        // No algo order seeded: the OCO has already filled and is gone.

        store.reconcile(&gateway, true).await.unwrap();

        assert!(!store.has(&symbol));
    }

    /// S5: a regular (non-algo) open order for an untracked symbol must never
    /// be folded into the protected/algo position set on load.
    #[tokio::test]
    async fn load_never_merges_regular_open_orders_into_positions() {
        use crate::test_support::FakeGateway;

        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let cache = MarketDataCache::new();
        let gateway = FakeGateway::new();
        let symbol = Symbol::from("ADA/USDT");
        gateway.set_open_order(&symbol);

        store.load(&gateway, &cache).await.unwrap();

        assert!(!store.has(&symbol));
    }

    /// Spec section 4.8 step 1: balances below the $1 notional floor, or with
    /// no ticker to price them, must not become provisional positions; the
    /// quote currency itself is never synthesized into a position either.
    #[tokio::test]
    async fn load_applies_minimum_notional_floor_and_skips_quote_currency() {
        use crate::test_support::FakeGateway;

        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let cache = MarketDataCache::new();
        let gateway = FakeGateway::new();

        gateway.set_balance("USDT", 500.0, 500.0);

        let dust = Symbol::from("SHIB/USDT");
        gateway.set_balance("SHIB", 10.0, 10.0);
        gateway.set_ticker(&dust, 0.01); // 10 * 0.01 = $0.10, below floor

        let real = Symbol::from("BTC/USDT");
        gateway.set_balance("BTC", 0.01, 0.01);
        gateway.set_ticker(&real, 50_000.0); // $500, above floor

        let no_ticker = Symbol::from("XRP/USDT");
        gateway.set_balance("XRP", 100.0, 100.0); // no ticker seeded

        store.load(&gateway, &cache).await.unwrap();

        assert!(!store.has(&Symbol::from("USDT/USDT")));
        assert!(!store.has(&dust));
        assert!(!store.has(&no_ticker));
        assert!(store.has(&real));
        assert_eq!(store.get(&real).unwrap().entry_price, 50_000.0);
    }

    #[test]
    fn save_is_atomic_no_partial_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let store = PositionStore::new(&path);
        store.upsert_and_save(position("SOL/USDT")).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
