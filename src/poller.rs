//! REST snapshot poller
//!
//! A periodic cross-check for the streaming feeds: fetches ticker
//! snapshots over HTTP and folds them into the shared price store through
//! the no-compare batch path, so a snapshot refreshes the median without
//! raising deviation alerts. Venues without a stable public snapshot
//! endpoint are simply not polled.

use crate::aggregator::PriceStore;
use crate::config::PollerConfig;
use crate::feed::venues::{bitfinex, mid_price, price_value};
use crate::types::{Asset, PriceUpdate, Venue};
use crate::util::{
    always_retry, retry_with_backoff, RetryOptions, ScheduledTask, ScheduledTaskOptions,
};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub struct PricePoller {
    http: reqwest::Client,
    prices: Arc<Mutex<PriceStore>>,
    config: PollerConfig,
    assets: Vec<Asset>,
}

impl PricePoller {
    pub fn new(
        config: PollerConfig,
        assets: Vec<Asset>,
        prices: Arc<Mutex<PriceStore>>,
    ) -> Result<Self> {
        // total deadline per attempt belongs to the retry loop, the
        // client only bounds connection establishment
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            prices,
            config,
            assets,
        })
    }

    /// Start polling on the configured interval. Dropping the returned
    /// task stops the poller.
    pub fn start(self) -> ScheduledTask {
        let period = Duration::from_millis(self.config.interval_ms);
        let poller = Arc::new(self);
        ScheduledTask::spawn(
            period,
            ScheduledTaskOptions {
                on_error: Some(Arc::new(|err| {
                    warn!(error = %err, "price snapshot poll failed");
                })),
                on_busy: Some(Arc::new(|| {
                    warn!("skipping snapshot poll: previous poll still running");
                })),
                run_immediately: true,
            },
            move || {
                let poller = Arc::clone(&poller);
                async move { poller.poll_once().await }
            },
        )
    }

    async fn poll_once(&self) -> Result<()> {
        let retry = RetryOptions {
            max_attempts: self.config.max_attempts,
            interval: Duration::from_secs(1),
            timeout: Duration::from_millis(self.config.request_timeout_ms),
        };

        // one venue failing never blocks the others
        match retry_with_backoff(|| self.fetch_binance(), retry, always_retry).await {
            Ok(updates) => self.store(Venue::Binance, &updates),
            Err(err) => warn!(venue = %Venue::Binance, error = %err, "snapshot fetch failed"),
        }

        match retry_with_backoff(|| self.fetch_bitfinex(), retry, always_retry).await {
            Ok(updates) => self.store(Venue::Bitfinex, &updates),
            Err(err) => warn!(venue = %Venue::Bitfinex, error = %err, "snapshot fetch failed"),
        }

        match retry_with_backoff(|| self.fetch_cryptocom(), retry, always_retry).await {
            Ok(updates) => self.store(Venue::CryptoCom, &updates),
            Err(err) => warn!(venue = %Venue::CryptoCom, error = %err, "snapshot fetch failed"),
        }

        Ok(())
    }

    fn store(&self, venue: Venue, updates: &[PriceUpdate]) {
        if updates.is_empty() {
            return;
        }
        debug!(venue = %venue, count = updates.len(), "storing snapshot prices");
        let mut prices = self.prices.lock().expect("price store poisoned");
        prices.store_venue_prices(venue, updates);
    }

    /// `GET /api/v3/ticker/price` returns every listed symbol; only the
    /// configured assets' USDT markets are kept. The endpoint carries last
    /// trade price only.
    async fn fetch_binance(&self) -> Result<Vec<PriceUpdate>> {
        let body: Value = self
            .http
            .get(&self.config.binance_rest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_binance_snapshot(&body, &self.assets)
    }

    /// `GET /v2/tickers?symbols=...` returns one array per requested
    /// market.
    async fn fetch_bitfinex(&self) -> Result<Vec<PriceUpdate>> {
        let symbols: Vec<&str> = self
            .assets
            .iter()
            .filter_map(|&asset| bitfinex::symbol_for(asset))
            .collect();
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let body: Value = self
            .http
            .get(&self.config.bitfinex_rest_url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_bitfinex_snapshot(&body)
    }

    /// `public/get-ticker` without an instrument filter returns all
    /// tickers with bid (`b`), ask (`k`), and last (`a`).
    async fn fetch_cryptocom(&self) -> Result<Vec<PriceUpdate>> {
        let body: Value = self
            .http
            .get(&self.config.cryptocom_rest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_cryptocom_snapshot(&body, &self.assets)
    }
}

fn parse_binance_snapshot(body: &Value, assets: &[Asset]) -> Result<Vec<PriceUpdate>> {
    let tickers = body
        .as_array()
        .context("unexpected snapshot response shape")?;

    let mut updates = Vec::new();
    for asset in assets {
        let symbol = format!("{asset}USDT");
        let Some(ticker) = tickers
            .iter()
            .find(|t| t.get("symbol").and_then(Value::as_str) == Some(symbol.as_str()))
        else {
            continue;
        };
        if let Some(price) = ticker.get("price").and_then(price_value) {
            updates.push(PriceUpdate {
                asset: *asset,
                price,
                last_price: price,
            });
        }
    }
    Ok(updates)
}

/// Ticker arrays: `[SYMBOL, BID, BID_SIZE, ASK, ASK_SIZE, DAILY_CHANGE,
/// DAILY_CHANGE_RELATIVE, LAST_PRICE, VOLUME, HIGH, LOW]`.
fn parse_bitfinex_snapshot(body: &Value) -> Result<Vec<PriceUpdate>> {
    let tickers = body
        .as_array()
        .context("unexpected snapshot response shape")?;

    let mut updates = Vec::new();
    for ticker in tickers {
        let Some(asset) = ticker[0].as_str().and_then(bitfinex::asset_for) else {
            continue;
        };
        let bid = price_value(&ticker[1]);
        let ask = price_value(&ticker[3]);
        let last = price_value(&ticker[7]);
        let (Some(bid), Some(ask), Some(last)) = (bid, ask, last) else {
            continue;
        };
        updates.push(PriceUpdate {
            asset,
            price: mid_price(bid, ask),
            last_price: last,
        });
    }
    Ok(updates)
}

fn parse_cryptocom_snapshot(body: &Value, assets: &[Asset]) -> Result<Vec<PriceUpdate>> {
    let tickers = body
        .pointer("/result/data")
        .and_then(Value::as_array)
        .context("unexpected snapshot response shape")?;

    let mut updates = Vec::new();
    for asset in assets {
        let symbol = format!("{asset}_USD");
        let Some(ticker) = tickers
            .iter()
            .find(|t| t.get("i").and_then(Value::as_str) == Some(symbol.as_str()))
        else {
            continue;
        };
        let last = ticker.get("a").and_then(price_value);
        let bid = ticker.get("b").and_then(price_value);
        let ask = ticker.get("k").and_then(price_value);
        let (Some(last), Some(bid), Some(ask)) = (last, bid, ask) else {
            continue;
        };
        updates.push(PriceUpdate {
            asset: *asset,
            price: mid_price(bid, ask),
            last_price: last,
        });
    }
    Ok(updates)
}
