//! Crypto.com adapter
//!
//! Ticker updates arrive as `subscribe`-method result frames. The venue
//! pushes unsolicited `public/heartbeat` messages that must be echoed back
//! with the same id or the server drops the connection.

use crate::error::FeedError;
use crate::feed::adapter::{FrameKind, VenueAdapter};
use crate::feed::venues::{mid_price, price_value};
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::{json, Value};

pub struct CryptoComAdapter;

pub(crate) fn symbol_for(asset: Asset) -> Option<&'static str> {
    // only the markets the keeper actually sources from crypto.com
    match asset {
        Asset::Btc => Some("BTC_USD"),
        Asset::Fxs => Some("FXS_USD"),
        _ => None,
    }
}

pub(crate) fn asset_for(symbol: &str) -> Option<Asset> {
    match symbol {
        "BTC_USD" => Some(Asset::Btc),
        "FXS_USD" => Some(Asset::Fxs),
        _ => None,
    }
}

fn channel_list(topics: &[Topic]) -> Vec<String> {
    topics
        .iter()
        .map(|t| format!("{}.{}", t.channel, t.symbol))
        .collect()
}

impl VenueAdapter for CryptoComAdapter {
    fn venue(&self) -> Venue {
        Venue::CryptoCom
    }

    fn topics(&self, assets: &[Asset]) -> Vec<Topic> {
        assets
            .iter()
            .filter_map(|&asset| symbol_for(asset))
            .map(Topic::ticker)
            .collect()
    }

    fn subscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        let frame = json!({
            "method": "subscribe",
            "params": { "channels": channel_list(topics) },
        });
        Ok(vec![frame.to_string()])
    }

    fn unsubscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        let frame = json!({
            "method": "unsubscribe",
            "params": { "channels": channel_list(topics) },
        });
        Ok(vec![frame.to_string()])
    }

    fn heartbeat_reply(&self, frame: &Value) -> Option<String> {
        let id = frame.get("id")?;
        Some(
            json!({
                "method": "public/respond-heartbeat",
                "id": id,
            })
            .to_string(),
        )
    }

    fn classify(&self, frame: &Value, _verified: &VerifiedSubscriptions) -> FrameKind {
        if frame["method"] == "subscribe" && !frame["result"].is_null() {
            return FrameKind::Update;
        }
        if frame["method"] == "public/heartbeat" {
            return FrameKind::Heartbeat;
        }
        FrameKind::Other
    }

    fn parse_update(
        &self,
        frame: &Value,
        _verified: &VerifiedSubscriptions,
    ) -> Result<PriceUpdate, FeedError> {
        let result = &frame["result"];
        let asset = result["instrument_name"]
            .as_str()
            .and_then(asset_for)
            .ok_or_else(|| FeedError::parse(self.venue(), "unresolved instrument name"))?;
        let data = &result["data"][0];
        let last = price_value(&data["a"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing last price"))?;
        let bid = price_value(&data["b"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best bid"))?;
        let ask = price_value(&data["k"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best ask"))?;

        Ok(PriceUpdate {
            asset,
            price: mid_price(bid, ask),
            last_price: last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;

    fn ticker_frame(instrument: &str, last: f64, bid: f64, ask: f64) -> Value {
        json!({
            "id": -1,
            "code": 0,
            "method": "subscribe",
            "result": {
                "channel": "ticker",
                "instrument_name": instrument,
                "subscription": format!("ticker.{}", instrument),
                "data": [{ "a": last, "b": bid, "k": ask }],
            },
        })
    }

    #[test]
    fn test_topics_cover_only_listed_markets() {
        let topics = CryptoComAdapter.topics(&Asset::ALL);
        let symbols: Vec<&str> = topics.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC_USD", "FXS_USD"]);
    }

    #[test]
    fn test_subscribe_batches_channels() {
        let adapter = CryptoComAdapter;
        let topics = adapter.topics(&[Asset::Btc, Asset::Fxs]);
        let frames = adapter.subscribe_frames(&topics).unwrap();
        assert_eq!(frames.len(), 1);
        let parsed: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["method"], "subscribe");
        assert_eq!(parsed["params"]["channels"][0], "ticker.BTC_USD");
        assert_eq!(parsed["params"]["channels"][1], "ticker.FXS_USD");
    }

    #[test]
    fn test_heartbeat_reply_echoes_id() {
        let frame = json!({ "id": 1587523073344u64, "method": "public/heartbeat" });
        assert_eq!(
            CryptoComAdapter.classify(&frame, &HashMap::new()),
            FrameKind::Heartbeat
        );
        let reply = CryptoComAdapter.heartbeat_reply(&frame).unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["method"], "public/respond-heartbeat");
        assert_eq!(parsed["id"], 1587523073344u64);
    }

    #[test]
    fn test_parse_ticker_update() {
        let verified = HashMap::new();
        let frame = ticker_frame("BTC_USD", 16823.5, 16823.0, 16824.0);
        assert_eq!(CryptoComAdapter.classify(&frame, &verified), FrameKind::Update);
        let update = CryptoComAdapter.parse_update(&frame, &verified).unwrap();
        assert_eq!(update.asset, Asset::Btc);
        assert_eq!(update.price, dec!(16823.5));
        assert_eq!(update.last_price, dec!(16823.5));
    }

    #[test]
    fn test_ack_without_result_is_other() {
        // bare subscribe confirmation has no result payload
        let frame = json!({ "id": 11, "method": "subscribe", "code": 0 });
        assert_eq!(CryptoComAdapter.classify(&frame, &HashMap::new()), FrameKind::Other);
    }
}
