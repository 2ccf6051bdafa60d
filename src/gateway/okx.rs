// =============================================================================
// OKX REST API Client — HMAC-SHA256 signed requests (base64)
// =============================================================================
//
// SECURITY: api_secret and api_passphrase are never logged or serialized.
// OKX signs `timestamp + method + request_path + body` with HMAC-SHA256 and
// base64-encodes the digest (unlike Binance's hex-encoded query-string
// signature). Every signed request also carries the passphrase as a header.
// =============================================================================

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::gateway::circuit_breaker::CircuitBreaker;
use crate::gateway::rate_limit::RateLimitTracker;
use crate::gateway::ExchangeGateway;
use crate::types::{
    AlgoAck, AlgoOrder, BalanceInfo, BookLevel, Candle, Order, OrderAck, OrderBookSnapshot, Symbol,
    Ticker, Timeframe,
};

type HmacSha256 = Hmac<Sha256>;

/// OKX REST API client with HMAC-SHA256 base64 request signing.
pub struct OkxGateway {
    api_key: String,
    api_secret: String,
    api_passphrase: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitTracker,
    market_data_breaker: CircuitBreaker,
    trading_breaker: CircuitBreaker,
}

impl OkxGateway {
    /// Create a new `OkxGateway`.
    ///
    /// `api_key`/`api_secret`/`api_passphrase` are OKX's three-part API
    /// credential scheme — all three are required for signed endpoints.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, api_passphrase: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("OkxGateway initialised (base_url=https://www.okx.com)");

        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            api_passphrase: api_passphrase.into(),
            base_url: "https://www.okx.com".to_string(),
            client,
            rate_limit: RateLimitTracker::new(),
            market_data_breaker: CircuitBreaker::new("okx_market_data"),
            trading_breaker: CircuitBreaker::new("okx_trading"),
        }
    }

    // -------------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------------

    /// ISO-8601 millisecond timestamp, as OKX requires for the signature base.
    fn timestamp_iso() -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch");
        let secs = now.as_secs();
        let millis = now.subsec_millis();
        let dt = chrono::DateTime::from_timestamp(secs as i64, 0).unwrap_or_default();
        format!("{}.{:03}Z", dt.format("%Y-%m-%dT%H:%M:%S"), millis)
    }

    /// Sign `timestamp + method + request_path + body` and base64-encode it.
    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let prehash = format!("{timestamp}{method}{request_path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(prehash.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn signed_headers(&self, method: &str, request_path: &str, body: &str) -> HeaderMap {
        let ts = Self::timestamp_iso();
        let sig = self.sign(&ts, method, request_path, body);

        let mut headers = HeaderMap::new();
        headers.insert("OK-ACCESS-KEY", HeaderValue::from_str(&self.api_key).unwrap());
        headers.insert("OK-ACCESS-SIGN", HeaderValue::from_str(&sig).unwrap());
        headers.insert("OK-ACCESS-TIMESTAMP", HeaderValue::from_str(&ts).unwrap());
        headers.insert(
            "OK-ACCESS-PASSPHRASE",
            HeaderValue::from_str(&self.api_passphrase).unwrap(),
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        if !self.market_data_breaker.allow_call() {
            bail!("circuit open for market-data reads, skipping GET {path}");
        }
        if !self.rate_limit.can_send_request(1) {
            bail!("rate limit budget exhausted for GET {path}");
        }
        let result = self.do_get(path).await;
        match &result {
            Ok(_) => self.market_data_breaker.record_success(),
            Err(_) => self.market_data_breaker.record_failure(),
        }
        result
    }

    async fn do_get(&self, path: &str) -> Result<serde_json::Value> {
        let headers = self.signed_headers("GET", path, "");
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;
        self.rate_limit.record_request_sent();

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response body for GET {path}"))?;

        if !status.is_success() {
            bail!("OKX GET {path} returned {status}: {body}");
        }
        Self::check_okx_code(&body)?;
        Ok(body)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        if !self.trading_breaker.allow_call() {
            bail!("circuit open for order submission, skipping POST {path}");
        }
        if !self.rate_limit.can_send_request(1) {
            bail!("rate limit budget exhausted for POST {path}");
        }
        let result = self.do_post(path, body).await;
        match &result {
            Ok(_) => self.trading_breaker.record_success(),
            Err(_) => self.trading_breaker.record_failure(),
        }
        result
    }

    async fn do_post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let body_str = body.to_string();
        let headers = self.signed_headers("POST", path, &body_str);
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body_str)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;
        self.rate_limit.record_request_sent();

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response body for POST {path}"))?;

        if !status.is_success() {
            bail!("OKX POST {path} returned {status}: {resp_body}");
        }
        Self::check_okx_code(&resp_body)?;
        Ok(resp_body)
    }

    /// OKX always returns HTTP 200 with a business `code` field; `"0"` means
    /// success, anything else is a rejection even though the transport layer
    /// looks fine.
    fn check_okx_code(body: &serde_json::Value) -> Result<()> {
        match body.get("code").and_then(|c| c.as_str()) {
            Some("0") | None => Ok(()),
            Some(code) => {
                let msg = body
                    .get("msg")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                bail!("OKX rejected request: code={code} msg={msg}");
            }
        }
    }

    fn parse_str_f64(val: &serde_json::Value) -> f64 {
        val.as_str()
            .and_then(|s| if s.is_empty() { None } else { s.parse::<f64>().ok() })
            .or_else(|| val.as_f64())
            .unwrap_or(0.0)
    }
}

impl ExchangeGateway for OkxGateway {
    #[instrument(skip(self), name = "okx::discover_liquid_symbols")]
    async fn discover_liquid_symbols(
        &self,
        min_quote_volume_usd: f64,
        quote: &str,
        limit: u32,
    ) -> Result<Vec<Symbol>> {
        let body = self.get("/api/v5/market/tickers?instType=SPOT").await?;
        let data = body["data"].as_array().context("tickers response missing data")?;

        let mut candidates: Vec<(Symbol, f64)> = Vec::new();
        for entry in data {
            let inst_id = entry["instId"].as_str().unwrap_or("");
            if !inst_id.ends_with(&format!("-{quote}")) {
                continue;
            }
            let vol_ccy_24h = Self::parse_str_f64(&entry["volCcy24h"]);
            if vol_ccy_24h >= min_quote_volume_usd {
                candidates.push((Symbol::from_gateway(inst_id), vol_ccy_24h));
            }
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit as usize);

        debug!(count = candidates.len(), "discovered liquid symbols");
        Ok(candidates.into_iter().map(|(s, _)| s).collect())
    }

    #[instrument(skip(self), name = "okx::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Option<Ticker>> {
        let path = format!("/api/v5/market/ticker?instId={}", symbol.to_gateway());
        let body = self.get(&path).await?;
        let Some(entry) = body["data"].as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };

        let last = Self::parse_str_f64(&entry["last"]);
        let high_24h = Self::parse_str_f64(&entry["high24h"]);
        let low_24h = Self::parse_str_f64(&entry["low24h"]);
        let open_24h = Self::parse_str_f64(&entry["open24h"]);
        let best_bid = Self::parse_str_f64(&entry["bidPx"]);
        let best_ask = Self::parse_str_f64(&entry["askPx"]);
        let quote_volume_24h = Self::parse_str_f64(&entry["volCcy24h"]);

        let percent_change_24h = if open_24h > 0.0 {
            (last - open_24h) / open_24h * 100.0
        } else {
            0.0
        };

        if last <= 0.0 {
            return Ok(None);
        }

        Ok(Some(Ticker {
            last,
            high_24h,
            low_24h,
            quote_volume_24h,
            percent_change_24h,
            best_bid,
            best_ask,
        }))
    }

    #[instrument(skip(self), name = "okx::fetch_candles")]
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Option<Vec<Candle>>> {
        let path = format!(
            "/api/v5/market/candles?instId={}&bar={}&limit={}",
            symbol.to_gateway(),
            timeframe.as_str(),
            limit
        );
        let body = self.get(&path).await?;
        let Some(raw) = body["data"].as_array() else {
            return Ok(None);
        };

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let Some(arr) = entry.as_array() else { continue };
            if arr.len() < 6 {
                warn!(symbol = %symbol, "skipping malformed candle entry");
                continue;
            }
            let open_time: i64 = arr[0].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
            let candle = Candle {
                open_time,
                open: Self::parse_str_f64(&arr[1]),
                high: Self::parse_str_f64(&arr[2]),
                low: Self::parse_str_f64(&arr[3]),
                close: Self::parse_str_f64(&arr[4]),
                volume: Self::parse_str_f64(&arr[5]),
            };
            if candle.is_valid() {
                candles.push(candle);
            } else {
                warn!(symbol = %symbol, "dropping candle failing OHLCV invariants");
            }
        }

        // OKX returns newest-first; the rest of the engine expects oldest-first.
        candles.reverse();
        if candles.is_empty() {
            Ok(None)
        } else {
            Ok(Some(candles))
        }
    }

    #[instrument(skip(self), name = "okx::fetch_order_book")]
    async fn fetch_order_book(&self, symbol: &Symbol, depth: u32) -> Result<Option<OrderBookSnapshot>> {
        let path = format!(
            "/api/v5/market/books?instId={}&sz={}",
            symbol.to_gateway(),
            depth
        );
        let body = self.get(&path).await?;
        let Some(entry) = body["data"].as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };

        let parse_levels = |arr: &serde_json::Value| -> Vec<BookLevel> {
            arr.as_array()
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|lvl| {
                            let lvl = lvl.as_array()?;
                            Some(BookLevel {
                                price: Self::parse_str_f64(&lvl[0]),
                                size: Self::parse_str_f64(&lvl[1]),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let bids = parse_levels(&entry["bids"]);
        let asks = parse_levels(&entry["asks"]);
        let ts: i64 = entry["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);

        let snapshot = OrderBookSnapshot { bids, asks, timestamp: ts };
        if snapshot.is_valid() {
            Ok(Some(snapshot))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self), name = "okx::fetch_balance")]
    async fn fetch_balance(&self) -> Result<HashMap<String, BalanceInfo>> {
        let body = self.get("/api/v5/account/balance").await?;
        let mut out = HashMap::new();

        let Some(account) = body["data"].as_array().and_then(|a| a.first()) else {
            return Ok(out);
        };
        let Some(details) = account["details"].as_array() else {
            return Ok(out);
        };

        for d in details {
            let ccy = d["ccy"].as_str().unwrap_or("").to_string();
            if ccy.is_empty() {
                continue;
            }
            let free = Self::parse_str_f64(&d["availBal"]);
            let total = Self::parse_str_f64(&d["cashBal"]);
            out.insert(ccy, BalanceInfo { free, total });
        }

        debug!(count = out.len(), "balances retrieved");
        Ok(out)
    }

    #[instrument(skip(self), name = "okx::fetch_open_orders")]
    async fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        let body = self
            .get("/api/v5/trade/orders-pending?instType=SPOT")
            .await?;
        let Some(data) = body["data"].as_array() else {
            return Ok(Vec::new());
        };

        let orders = data
            .iter()
            .filter_map(|entry| {
                let order_id = entry["ordId"].as_str()?.to_string();
                let inst_id = entry["instId"].as_str()?;
                let side = entry["side"].as_str().unwrap_or("").to_string();
                let order_type = entry["ordType"].as_str().unwrap_or("").to_string();
                Some(Order {
                    order_id,
                    symbol: Symbol::from_gateway(inst_id),
                    side,
                    order_type,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = orders.len(), "regular open orders retrieved");
        Ok(orders)
    }

    #[instrument(skip(self), name = "okx::fetch_algo_orders")]
    async fn fetch_algo_orders(&self, kind: &str, state: &str) -> Result<Vec<AlgoOrder>> {
        let path = format!(
            "/api/v5/trade/orders-algo-pending?ordType={kind}&state={state}&instType=SPOT"
        );
        let body = self.get(&path).await?;
        let Some(data) = body["data"].as_array() else {
            return Ok(Vec::new());
        };

        let orders = data
            .iter()
            .filter_map(|entry| {
                let algo_id = entry["algoId"].as_str()?.to_string();
                let inst_id = entry["instId"].as_str()?;
                let state = entry["state"].as_str().unwrap_or("").to_string();
                Some(AlgoOrder {
                    algo_id,
                    symbol: Symbol::from_gateway(inst_id),
                    state,
                })
            })
            .collect::<Vec<_>>();

        debug!(count = orders.len(), kind, state, "live algo orders retrieved");
        Ok(orders)
    }

    #[instrument(skip(self), name = "okx::place_market_buy")]
    async fn place_market_buy(&self, symbol: &Symbol, base_amount: f64) -> Result<OrderAck> {
        let body = serde_json::json!({
            "instId": symbol.to_gateway(),
            "tdMode": "cash",
            "side": "buy",
            "ordType": "market",
            "sz": format!("{base_amount}"),
            "tgtCcy": "base_ccy",
        });

        let resp = self.post("/api/v5/trade/order", &body).await?;
        let entry = resp["data"]
            .as_array()
            .and_then(|a| a.first())
            .context("order response missing data entry")?;

        let order_id = entry["ordId"].as_str().unwrap_or("").to_string();
        debug!(symbol = %symbol, order_id, "market buy submitted");

        // OKX's order-submit ack rarely carries fill details; the caller
        // (Executor) confirms the actual fill via a settlement-wait balance
        // check rather than trusting this ack's size/price.
        Ok(OrderAck {
            order_id,
            filled_base: 0.0,
            avg_price: 0.0,
            status: "submitted".to_string(),
        })
    }

    #[instrument(skip(self), name = "okx::place_oco_sell")]
    async fn place_oco_sell(
        &self,
        symbol: &Symbol,
        base_amount: f64,
        stop_price: f64,
        take_profit_price: f64,
        entry_price: f64,
    ) -> Result<AlgoAck> {
        let _ = entry_price;
        let body = serde_json::json!({
            "instId": symbol.to_gateway(),
            "tdMode": "cash",
            "side": "sell",
            "ordType": "oco",
            "sz": format!("{base_amount}"),
            "tpTriggerPx": format!("{take_profit_price}"),
            "tpOrdPx": "-1",
            "slTriggerPx": format!("{stop_price}"),
            "slOrdPx": "-1",
        });

        match self.post("/api/v5/trade/order-algo", &body).await {
            Ok(resp) => {
                let entry = resp["data"].as_array().and_then(|a| a.first());
                let algo_id = entry
                    .and_then(|e| e["algoId"].as_str())
                    .unwrap_or("")
                    .to_string();
                Ok(AlgoAck {
                    algo_id,
                    status: "live".to_string(),
                    error_code: None,
                })
            }
            Err(e) => Ok(AlgoAck {
                algo_id: String::new(),
                status: "failed".to_string(),
                error_code: Some(e.to_string()),
            }),
        }
    }

    #[instrument(skip(self), name = "okx::cancel_algo_order")]
    async fn cancel_algo_order(&self, algo_id: &str) -> Result<()> {
        let body = serde_json::json!([{ "algoId": algo_id }]);
        self.post("/api/v5/trade/cancel-algos", &body).await?;
        debug!(algo_id, "algo order cancelled");
        Ok(())
    }
}

impl std::fmt::Debug for OkxGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxGateway")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("api_passphrase", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_same_inputs() {
        let gw = OkxGateway::new("key", "secret", "pass");
        let a = gw.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        let b = gw.sign("2024-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        assert_eq!(a, b);
    }

    #[test]
    fn sign_differs_with_path() {
        let gw = OkxGateway::new("key", "secret", "pass");
        let a = gw.sign("ts", "GET", "/api/v5/account/balance", "");
        let b = gw.sign("ts", "GET", "/api/v5/market/ticker", "");
        assert_ne!(a, b);
    }

    #[test]
    fn parse_str_f64_handles_empty_string() {
        assert_eq!(OkxGateway::parse_str_f64(&serde_json::json!("")), 0.0);
        assert_eq!(OkxGateway::parse_str_f64(&serde_json::json!("1.5")), 1.5);
    }
}
