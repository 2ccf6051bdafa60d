// =============================================================================
// EngineConfig — runtime configuration surface, atomic save
// =============================================================================
//
// Every field carries `#[serde(default)]` so that adding a new tunable never
// breaks loading an older config file. Persistence uses the same temp-file +
// rename pattern as PositionStore.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_polling_interval_seconds() -> u64 {
    30
}

fn default_max_concurrent_positions() -> usize {
    10
}

fn default_min_quote_volume_usd() -> f64 {
    40_000_000.0
}

fn default_top_n_analyzed() -> usize {
    15
}

fn default_min_liquidity() -> f64 {
    0.30
}

fn default_reconcile_min_interval_seconds() -> u64 {
    60
}

fn default_oco_settlement_wait_seconds() -> u64 {
    1
}

fn default_quote() -> String {
    "USDT".to_string()
}

fn default_portfolio_equity_usd() -> f64 {
    10_000.0
}

fn default_default_lot_step() -> f64 {
    0.0001
}

fn default_positions_path() -> String {
    "positions.json".to_string()
}

/// Top-level engine configuration. Loaded from a JSON file with every field
/// optional (older/partial files still parse), and persisted back atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_polling_interval_seconds")]
    pub polling_interval_seconds: u64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    #[serde(default = "default_min_quote_volume_usd")]
    pub min_quote_volume_usd: f64,

    #[serde(default = "default_top_n_analyzed")]
    pub top_n_analyzed: usize,

    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,

    #[serde(default = "default_reconcile_min_interval_seconds")]
    pub reconcile_min_interval_seconds: u64,

    #[serde(default = "default_oco_settlement_wait_seconds")]
    pub oco_settlement_wait_seconds: u64,

    #[serde(default = "default_quote")]
    pub quote: String,

    #[serde(default = "default_portfolio_equity_usd")]
    pub portfolio_equity_usd: f64,

    #[serde(default = "default_default_lot_step")]
    pub default_lot_step: f64,

    #[serde(default = "default_positions_path")]
    pub positions_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval_seconds(),
            max_concurrent_positions: default_max_concurrent_positions(),
            min_quote_volume_usd: default_min_quote_volume_usd(),
            top_n_analyzed: default_top_n_analyzed(),
            min_liquidity: default_min_liquidity(),
            reconcile_min_interval_seconds: default_reconcile_min_interval_seconds(),
            oco_settlement_wait_seconds: default_oco_settlement_wait_seconds(),
            quote: default_quote(),
            portfolio_equity_usd: default_portfolio_equity_usd(),
            default_lot_step: default_default_lot_step(),
            positions_path: default_positions_path(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`. If the file does not
    /// exist, callers should fall back to `EngineConfig::default()`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Persist via temp-file + rename, matching PositionStore's write discipline.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize engine config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp engine config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp engine config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
