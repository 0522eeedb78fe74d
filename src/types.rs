//! Core types used throughout pricekeeper
//!
//! Defines the asset universe, the venue keys and the normalized
//! price-update shape shared by every venue adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assets with at least one venue feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    Btc,
    Eth,
    Link,
    Uni,
    Crv,
    Fxs,
    Bal,
}

impl Asset {
    pub const ALL: [Asset; 7] = [
        Asset::Btc,
        Asset::Eth,
        Asset::Link,
        Asset::Uni,
        Asset::Crv,
        Asset::Fxs,
        Asset::Bal,
    ];

    /// Parse from a config string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Asset::Btc),
            "ETH" => Some(Asset::Eth),
            "LINK" => Some(Asset::Link),
            "UNI" => Some(Asset::Uni),
            "CRV" => Some(Asset::Crv),
            "FXS" => Some(Asset::Fxs),
            "BAL" => Some(Asset::Bal),
            _ => None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Link => "LINK",
            Asset::Uni => "UNI",
            Asset::Crv => "CRV",
            Asset::Fxs => "FXS",
            Asset::Bal => "BAL",
        };
        write!(f, "{}", s)
    }
}

/// One external market-data source with its own wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    Bitfinex,
    Coinbase,
    CryptoCom,
    Ftx,
}

impl Venue {
    pub const ALL: [Venue; 5] = [
        Venue::Binance,
        Venue::Bitfinex,
        Venue::Coinbase,
        Venue::CryptoCom,
        Venue::Ftx,
    ];

    /// Parse from a config string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "bitfinex" => Some(Venue::Bitfinex),
            "coinbase" => Some(Venue::Coinbase),
            "cryptocom" => Some(Venue::CryptoCom),
            "ftx" => Some(Venue::Ftx),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Venue::Binance => "binance",
            Venue::Bitfinex => "bitfinex",
            Venue::Coinbase => "coinbase",
            Venue::CryptoCom => "cryptoCom",
            Venue::Ftx => "ftx",
        };
        write!(f, "{}", s)
    }
}

/// Normalized tick from any venue
///
/// `price` is the mid of best bid/ask; `last_price` is the venue's last
/// trade price, kept alongside for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub asset: Asset,
    pub price: Decimal,
    pub last_price: Decimal,
}

/// One entry of an aggregated price snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPrice {
    pub asset: Asset,
    pub price: Decimal,
}
