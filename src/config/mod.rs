//! Configuration management
//!
//! Loads from a YAML file plus `PRICEKEEPER_`-prefixed environment
//! variables via .env. Every field has a default so the engine runs with
//! no file at all.

use crate::feed::ClientOptions;
use crate::types::{Asset, Venue};
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Assets to aggregate
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// How often to look for venue feeds that have gone quiet
    #[serde(default = "default_stale_check_interval_ms")]
    pub stale_check_interval_ms: u64,
    /// Age past which a venue observation counts as stale
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            stale_check_interval_ms: default_stale_check_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

fn default_assets() -> Vec<String> {
    Asset::ALL.iter().map(|a| a.to_string()).collect()
}

fn default_stale_check_interval_ms() -> u64 {
    60_000
}

fn default_stale_after_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Relative deviation that triggers an alert, unless overridden
    #[serde(default = "default_threshold")]
    pub default_deviation_threshold: f64,
    /// Per-asset threshold overrides, keyed by asset symbol
    #[serde(default = "default_overrides")]
    pub deviation_thresholds: HashMap<String, f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_deviation_threshold: default_threshold(),
            deviation_thresholds: default_overrides(),
        }
    }
}

fn default_threshold() -> f64 {
    0.0012
}

fn default_overrides() -> HashMap<String, f64> {
    HashMap::from([
        ("LINK".to_string(), 0.003),
        ("UNI".to_string(), 0.003),
        ("CRV".to_string(), 0.005),
        ("FXS".to_string(), 0.005),
        ("BAL".to_string(), 0.005),
    ])
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub enabled: bool,
    pub url: String,
    /// How often to check that the connection is still alive
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// How long to wait before deciding the connection is dead
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// How long to wait before reattempting a closed connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_on_close")]
    pub reconnect_on_close: bool,
}

fn default_ping_interval_ms() -> u64 {
    10_000
}

fn default_pong_timeout_ms() -> u64 {
    7_500
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

fn default_reconnect_on_close() -> bool {
    true
}

impl VenueConfig {
    fn with_url(url: &str, enabled: bool) -> Self {
        Self {
            enabled,
            url: url.to_string(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_on_close: default_reconnect_on_close(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(self.url.clone());
        options.ping_interval = Duration::from_millis(self.ping_interval_ms);
        options.pong_timeout = Duration::from_millis(self.pong_timeout_ms);
        options.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        options.reconnect_on_close = self.reconnect_on_close;
        options
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenuesConfig {
    #[serde(default = "default_binance")]
    pub binance: VenueConfig,
    #[serde(default = "default_bitfinex")]
    pub bitfinex: VenueConfig,
    #[serde(default = "default_coinbase")]
    pub coinbase: VenueConfig,
    #[serde(default = "default_cryptocom")]
    pub cryptocom: VenueConfig,
    #[serde(default = "default_ftx")]
    pub ftx: VenueConfig,
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            binance: default_binance(),
            bitfinex: default_bitfinex(),
            coinbase: default_coinbase(),
            cryptocom: default_cryptocom(),
            ftx: default_ftx(),
        }
    }
}

fn default_binance() -> VenueConfig {
    VenueConfig::with_url("wss://stream.binance.com/stream", true)
}

fn default_bitfinex() -> VenueConfig {
    VenueConfig::with_url("wss://api-pub.bitfinex.com/ws/2", true)
}

fn default_coinbase() -> VenueConfig {
    VenueConfig::with_url("wss://ws-feed.exchange.coinbase.com", true)
}

fn default_cryptocom() -> VenueConfig {
    VenueConfig::with_url("wss://stream.crypto.com/v2/market", true)
}

fn default_ftx() -> VenueConfig {
    // streaming of FTX markets is paused
    VenueConfig::with_url("wss://ftx.com/ws/", false)
}

impl VenuesConfig {
    pub fn venue(&self, venue: Venue) -> &VenueConfig {
        match venue {
            Venue::Binance => &self.binance,
            Venue::Bitfinex => &self.bitfinex,
            Venue::Coinbase => &self.coinbase,
            Venue::CryptoCom => &self.cryptocom,
            Venue::Ftx => &self.ftx,
        }
    }

    pub fn enabled_venues(&self) -> Vec<Venue> {
        Venue::ALL
            .into_iter()
            .filter(|&v| self.venue(v).enabled)
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// REST snapshot polling alongside the streams
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_binance_rest_url")]
    pub binance_rest_url: String,
    #[serde(default = "default_bitfinex_rest_url")]
    pub bitfinex_rest_url: String,
    #[serde(default = "default_cryptocom_rest_url")]
    pub cryptocom_rest_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_poll_interval_ms(),
            binance_rest_url: default_binance_rest_url(),
            bitfinex_rest_url: default_bitfinex_rest_url(),
            cryptocom_rest_url: default_cryptocom_rest_url(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com/api/v3/ticker/price".to_string()
}

fn default_bitfinex_rest_url() -> String {
    "https://api-pub.bitfinex.com/v2/tickers".to_string()
}

fn default_cryptocom_rest_url() -> String {
    "https://api.crypto.com/v2/public/get-ticker".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

impl AppConfig {
    /// Load configuration from an optional file + environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        } else {
            builder = builder
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("PRICEKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for symbol in &self.engine.assets {
            if Asset::parse(symbol).is_none() {
                bail!("unknown asset in engine.assets: {}", symbol);
            }
        }
        for symbol in self.aggregator.deviation_thresholds.keys() {
            if Asset::parse(symbol).is_none() {
                bail!("unknown asset in aggregator.deviation_thresholds: {}", symbol);
            }
        }
        if self.aggregator.default_deviation_threshold <= 0.0 {
            bail!("aggregator.default_deviation_threshold must be positive");
        }
        Ok(())
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.engine
            .assets
            .iter()
            .filter_map(|s| Asset::parse(s))
            .collect()
    }

    /// Alert thresholds as decimals: (default, per-asset overrides).
    pub fn thresholds(&self) -> Result<(Decimal, HashMap<Asset, Decimal>)> {
        let default = Decimal::from_f64(self.aggregator.default_deviation_threshold)
            .context("default deviation threshold is not representable")?;
        let mut overrides = HashMap::new();
        for (symbol, &threshold) in &self.aggregator.deviation_thresholds {
            let asset = Asset::parse(symbol)
                .with_context(|| format!("unknown asset: {}", symbol))?;
            let threshold = Decimal::from_f64(threshold)
                .with_context(|| format!("threshold for {} is not representable", symbol))?;
            overrides.insert(asset, threshold);
        }
        Ok((default, overrides))
    }
}
