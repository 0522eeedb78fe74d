//! FTX adapter
//!
//! Ticker updates are `{channel, market, type:"update", data:{...}}`
//! frames; the venue answers an application-level `{op:"ping"}` with
//! `{type:"pong"}`. One subscribe payload per topic.

use crate::error::FeedError;
use crate::feed::adapter::{FrameKind, VenueAdapter};
use crate::feed::venues::{mid_price, price_value};
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::{json, Value};

pub struct FtxAdapter;

pub(crate) fn symbol_for(asset: Asset) -> &'static str {
    match asset {
        Asset::Btc => "BTC/USD",
        Asset::Eth => "ETH/USD",
        Asset::Link => "LINK/USD",
        Asset::Uni => "UNI/USD",
        Asset::Crv => "CRV/USD",
        Asset::Fxs => "FXS/USD",
        Asset::Bal => "BAL/USD",
    }
}

pub(crate) fn asset_for(symbol: &str) -> Option<Asset> {
    match symbol {
        "BTC/USD" => Some(Asset::Btc),
        "ETH/USD" => Some(Asset::Eth),
        "LINK/USD" => Some(Asset::Link),
        "UNI/USD" => Some(Asset::Uni),
        "CRV/USD" => Some(Asset::Crv),
        "FXS/USD" => Some(Asset::Fxs),
        "BAL/USD" => Some(Asset::Bal),
        _ => None,
    }
}

impl VenueAdapter for FtxAdapter {
    fn venue(&self) -> Venue {
        Venue::Ftx
    }

    fn topics(&self, assets: &[Asset]) -> Vec<Topic> {
        assets
            .iter()
            .map(|&asset| Topic::ticker(symbol_for(asset)))
            .collect()
    }

    fn subscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        Ok(topics
            .iter()
            .map(|t| {
                json!({
                    "op": "subscribe",
                    "channel": t.channel,
                    "market": t.symbol,
                })
                .to_string()
            })
            .collect())
    }

    fn unsubscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        Ok(topics
            .iter()
            .map(|t| {
                json!({
                    "op": "unsubscribe",
                    "channel": t.channel,
                    "market": t.symbol,
                })
                .to_string()
            })
            .collect())
    }

    fn ping_frame(&self) -> Option<String> {
        Some(json!({ "op": "ping" }).to_string())
    }

    fn classify(&self, frame: &Value, _verified: &VerifiedSubscriptions) -> FrameKind {
        if frame.get("channel").is_some() && frame["type"] == "update" {
            return FrameKind::Update;
        }
        if frame["type"] == "pong" {
            return FrameKind::Pong;
        }
        FrameKind::Other
    }

    fn parse_update(
        &self,
        frame: &Value,
        _verified: &VerifiedSubscriptions,
    ) -> Result<PriceUpdate, FeedError> {
        let asset = frame["market"]
            .as_str()
            .and_then(asset_for)
            .ok_or_else(|| FeedError::parse(self.venue(), "unresolved market"))?;
        let data = &frame["data"];
        let last = price_value(&data["last"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing last price"))?;
        let bid = price_value(&data["bid"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best bid"))?;
        let ask = price_value(&data["ask"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best ask"))?;

        Ok(PriceUpdate {
            asset,
            price: mid_price(bid, ask),
            last_price: last,
        })
    }
}
