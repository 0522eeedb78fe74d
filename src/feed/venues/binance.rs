//! Binance adapter
//!
//! Combined-stream ticker frames: `{"stream":"ethusdt@ticker","data":{...}}`
//! with string-encoded prices. All topics batch into a single SUBSCRIBE
//! payload; liveness rides on transport-level ping frames.

use crate::error::FeedError;
use crate::feed::adapter::{FrameKind, VenueAdapter};
use crate::feed::venues::{mid_price, price_value};
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::{json, Value};

pub struct BinanceAdapter;

pub(crate) fn symbol_for(asset: Asset) -> &'static str {
    match asset {
        Asset::Btc => "BTCUSDT",
        Asset::Eth => "ETHUSDT",
        Asset::Link => "LINKUSDT",
        Asset::Uni => "UNIUSDT",
        Asset::Crv => "CRVUSDT",
        Asset::Fxs => "FXSUSDT",
        Asset::Bal => "BALUSDT",
    }
}

pub(crate) fn asset_for(symbol: &str) -> Option<Asset> {
    match symbol {
        "BTCUSDT" => Some(Asset::Btc),
        "ETHUSDT" => Some(Asset::Eth),
        "LINKUSDT" => Some(Asset::Link),
        "UNIUSDT" => Some(Asset::Uni),
        "CRVUSDT" => Some(Asset::Crv),
        "FXSUSDT" => Some(Asset::Fxs),
        "BALUSDT" => Some(Asset::Bal),
        _ => None,
    }
}

fn stream_params(topics: &[Topic]) -> Vec<String> {
    topics
        .iter()
        .map(|t| format!("{}@{}", t.symbol.to_lowercase(), t.channel))
        .collect()
}

impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
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
        let frame = json!({
            "method": "SUBSCRIBE",
            "params": stream_params(topics),
            "id": 1,
        });
        Ok(vec![frame.to_string()])
    }

    fn unsubscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        let frame = json!({
            "method": "UNSUBSCRIBE",
            "params": stream_params(topics),
            "id": 1,
        });
        Ok(vec![frame.to_string()])
    }

    fn classify(&self, frame: &Value, _verified: &VerifiedSubscriptions) -> FrameKind {
        if frame.get("stream").is_some() {
            FrameKind::Update
        } else {
            FrameKind::Other
        }
    }

    fn parse_update(
        &self,
        frame: &Value,
        _verified: &VerifiedSubscriptions,
    ) -> Result<PriceUpdate, FeedError> {
        let data = &frame["data"];
        let asset = data["s"]
            .as_str()
            .and_then(asset_for)
            .ok_or_else(|| FeedError::parse(self.venue(), "unresolved ticker symbol"))?;
        let last = price_value(&data["c"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing last price"))?;
        let bid = price_value(&data["b"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best bid"))?;
        let ask = price_value(&data["a"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best ask"))?;

        Ok(PriceUpdate {
            asset,
            price: mid_price(bid, ask),
            last_price: last,
        })
    }
}
