//! Coinbase adapter
//!
//! `ticker` channel frames carry the product id and string prices on every
//! tick. All product ids batch into a single subscribe payload; liveness
//! rides on transport-level ping frames.

use crate::error::FeedError;
use crate::feed::adapter::{FrameKind, VenueAdapter};
use crate::feed::venues::{mid_price, price_value};
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::{json, Value};

pub struct CoinbaseAdapter;

pub(crate) fn symbol_for(asset: Asset) -> Option<&'static str> {
    match asset {
        Asset::Btc => Some("BTC-USD"),
        Asset::Eth => Some("ETH-USD"),
        Asset::Link => Some("LINK-USD"),
        Asset::Uni => Some("UNI-USD"),
        Asset::Crv => Some("CRV-USD"),
        Asset::Bal => Some("BAL-USD"),
        Asset::Fxs => None,
    }
}

pub(crate) fn asset_for(symbol: &str) -> Option<Asset> {
    match symbol {
        "BTC-USD" => Some(Asset::Btc),
        "ETH-USD" => Some(Asset::Eth),
        "LINK-USD" => Some(Asset::Link),
        "UNI-USD" => Some(Asset::Uni),
        "CRV-USD" => Some(Asset::Crv),
        "BAL-USD" => Some(Asset::Bal),
        _ => None,
    }
}

fn batched_frame(request: &str, topics: &[Topic]) -> String {
    let product_ids: Vec<&str> = topics.iter().map(|t| t.symbol.as_str()).collect();
    json!({
        "type": request,
        "channels": ["ticker"],
        "product_ids": product_ids,
    })
    .to_string()
}

impl VenueAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
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
        Ok(vec![batched_frame("subscribe", topics)])
    }

    fn unsubscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError> {
        if topics.is_empty() {
            return Err(FeedError::EmptyTopics { venue: self.venue() });
        }
        Ok(vec![batched_frame("unsubscribe", topics)])
    }

    fn classify(&self, frame: &Value, _verified: &VerifiedSubscriptions) -> FrameKind {
        if frame["type"] == "ticker" {
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
        let asset = frame["product_id"]
            .as_str()
            .and_then(asset_for)
            .ok_or_else(|| FeedError::parse(self.venue(), "unresolved product id"))?;
        let last = price_value(&frame["price"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing last price"))?;
        let bid = price_value(&frame["best_bid"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best bid"))?;
        let ask = price_value(&frame["best_ask"])
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

    #[test]
    fn test_subscribe_batches_product_ids() {
        let adapter = CoinbaseAdapter;
        let topics = adapter.topics(&[Asset::Btc, Asset::Eth]);
        let frames = adapter.subscribe_frames(&topics).unwrap();
        assert_eq!(frames.len(), 1);
        let parsed: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["type"], "subscribe");
        assert_eq!(parsed["channels"][0], "ticker");
        assert_eq!(parsed["product_ids"][0], "BTC-USD");
        assert_eq!(parsed["product_ids"][1], "ETH-USD");
    }

    #[test]
    fn test_parse_ticker_update() {
        let verified = HashMap::new();
        let frame = json!({
            "type": "ticker",
            "product_id": "ETH-USD",
            "price": "1280.31",
            "best_bid": "1280.00",
            "best_ask": "1280.50",
        });
        assert_eq!(CoinbaseAdapter.classify(&frame, &verified), FrameKind::Update);
        let update = CoinbaseAdapter.parse_update(&frame, &verified).unwrap();
        assert_eq!(update.asset, Asset::Eth);
        assert_eq!(update.price, dec!(1280.25));
        assert_eq!(update.last_price, dec!(1280.31));
    }

    #[test]
    fn test_subscription_confirmation_is_other() {
        let verified = HashMap::new();
        let frame = json!({ "type": "subscriptions", "channels": [] });
        assert_eq!(CoinbaseAdapter.classify(&frame, &verified), FrameKind::Other);
    }

    #[test]
    fn test_missing_book_side_is_parse_error() {
        let verified = HashMap::new();
        let frame = json!({
            "type": "ticker",
            "product_id": "ETH-USD",
            "price": "1280.31",
            "best_bid": "1280.00",
        });
        assert!(CoinbaseAdapter.parse_update(&frame, &verified).is_err());
    }
}
