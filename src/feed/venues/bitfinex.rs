//! Bitfinex adapter
//!
//! The odd one out: subscriptions are acknowledged with a numeric channel
//! id and every later frame is an array keyed only by that id, so update
//! classification depends on the verified-subscription table. Array frames
//! carrying `"hb"` are channel keepalives, not updates.

use crate::error::FeedError;
use crate::feed::adapter::{FrameKind, SubscriptionAck, VenueAdapter};
use crate::feed::venues::{mid_price, price_value};
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::{json, Value};

pub struct BitfinexAdapter;

pub(crate) fn symbol_for(asset: Asset) -> Option<&'static str> {
    match asset {
        Asset::Btc => Some("tBTCUSD"),
        Asset::Eth => Some("tETHUSD"),
        Asset::Link => Some("tLINK:USD"),
        Asset::Uni => Some("tUNIUSD"),
        Asset::Crv => Some("tCRVUSD"),
        Asset::Bal => Some("tBALUSD"),
        // no tFXSUSD feed
        Asset::Fxs => None,
    }
}

pub(crate) fn asset_for(symbol: &str) -> Option<Asset> {
    match symbol {
        "tBTCUSD" => Some(Asset::Btc),
        "tETHUSD" => Some(Asset::Eth),
        "tLINK:USD" => Some(Asset::Link),
        "tUNIUSD" => Some(Asset::Uni),
        "tCRVUSD" => Some(Asset::Crv),
        "tBALUSD" => Some(Asset::Bal),
        _ => None,
    }
}

/// Channel ids arrive as JSON numbers; the verified table keys on their
/// canonical string form.
fn channel_token(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl VenueAdapter for BitfinexAdapter {
    fn venue(&self) -> Venue {
        Venue::Bitfinex
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
        Ok(topics
            .iter()
            .map(|t| {
                json!({
                    "event": "subscribe",
                    "channel": t.channel,
                    "symbol": t.symbol,
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
                    "method": "unsubscribe",
                    "channel": t.channel,
                    "symbol": t.symbol,
                })
                .to_string()
            })
            .collect())
    }

    fn ping_frame(&self) -> Option<String> {
        Some(json!({ "event": "ping" }).to_string())
    }

    fn classify(&self, frame: &Value, verified: &VerifiedSubscriptions) -> FrameKind {
        if frame["event"] == "subscribed" {
            return FrameKind::SubscriptionAck;
        }
        if let Some(items) = frame.as_array() {
            let known = items
                .first()
                .and_then(channel_token)
                .map(|token| verified.contains_key(&token))
                .unwrap_or(false);
            if known && items.get(1) != Some(&Value::String("hb".to_string())) {
                return FrameKind::Update;
            }
        }
        if frame["event"] == "pong" {
            return FrameKind::Pong;
        }
        FrameKind::Other
    }

    fn parse_subscription_ack(&self, frame: &Value) -> Result<SubscriptionAck, FeedError> {
        let token = channel_token(&frame["chanId"])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing chanId"))?;
        let symbol = frame["symbol"]
            .as_str()
            .ok_or_else(|| FeedError::parse(self.venue(), "missing symbol"))?;
        let asset = asset_for(symbol)
            .ok_or_else(|| FeedError::unknown_symbol(self.venue(), symbol))?;
        Ok(SubscriptionAck { token, asset })
    }

    fn parse_update(
        &self,
        frame: &Value,
        verified: &VerifiedSubscriptions,
    ) -> Result<PriceUpdate, FeedError> {
        let token = channel_token(&frame[0])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing channel id"))?;
        let asset = verified
            .get(&token)
            .copied()
            .ok_or_else(|| FeedError::parse(self.venue(), "unverified channel id"))?;

        // [BID, BID_SIZE, ASK, ASK_SIZE, Δ, Δ%, LAST_PRICE, VOL, HIGH, LOW]
        let ticker = &frame[1];
        let bid = price_value(&ticker[0])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best bid"))?;
        let ask = price_value(&ticker[2])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing best ask"))?;
        let last = price_value(&ticker[6])
            .ok_or_else(|| FeedError::parse(self.venue(), "missing last price"))?;

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

    fn verified_channel(token: &str, asset: Asset) -> VerifiedSubscriptions {
        HashMap::from([(token.to_string(), asset)])
    }

    fn ticker_frame(chan_id: u64, bid: f64, ask: f64, last: f64) -> Value {
        json!([chan_id, [bid, "10", ask, "10", "0", "0", last, "100", "0", "0"]])
    }

    #[test]
    fn test_subscribe_one_frame_per_topic() {
        let adapter = BitfinexAdapter;
        let topics = adapter.topics(&[Asset::Eth, Asset::Btc, Asset::Fxs]);
        // FXS has no bitfinex listing
        assert_eq!(topics.len(), 2);
        let frames = adapter.subscribe_frames(&topics).unwrap();
        assert_eq!(frames.len(), 2);
        let parsed: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["event"], "subscribe");
        assert_eq!(parsed["symbol"], "tETHUSD");
    }

    #[test]
    fn test_ack_resolves_channel_id_to_asset() {
        let ack = BitfinexAdapter
            .parse_subscription_ack(&json!({
                "event": "subscribed",
                "channel": "ticker",
                "chanId": 17470,
                "symbol": "tETHUSD",
            }))
            .unwrap();
        assert_eq!(ack.token, "17470");
        assert_eq!(ack.asset, Asset::Eth);
    }

    #[test]
    fn test_ack_with_unknown_symbol_fails() {
        let err = BitfinexAdapter
            .parse_subscription_ack(&json!({
                "event": "subscribed",
                "chanId": 1,
                "symbol": "tDOGEUSD",
            }))
            .unwrap_err();
        assert!(matches!(err, FeedError::UnknownSymbol { .. }));
    }

    #[test]
    fn test_unverified_channel_is_not_an_update() {
        let verified = verified_channel("17470", Asset::Eth);
        let frame = ticker_frame(99999, 1279.0, 1281.0, 1280.0);
        assert_eq!(BitfinexAdapter.classify(&frame, &verified), FrameKind::Other);
    }

    #[test]
    fn test_heartbeat_array_is_not_an_update() {
        let verified = verified_channel("17470", Asset::Eth);
        let frame = json!([17470, "hb"]);
        assert_eq!(BitfinexAdapter.classify(&frame, &verified), FrameKind::Other);
    }

    #[test]
    fn test_classify_precedence_ack_then_update_then_pong() {
        let verified = verified_channel("17470", Asset::Eth);
        assert_eq!(
            BitfinexAdapter.classify(&json!({"event": "subscribed"}), &verified),
            FrameKind::SubscriptionAck
        );
        assert_eq!(
            BitfinexAdapter.classify(&ticker_frame(17470, 1.0, 2.0, 1.5), &verified),
            FrameKind::Update
        );
        assert_eq!(
            BitfinexAdapter.classify(&json!({"event": "pong"}), &verified),
            FrameKind::Pong
        );
    }

    #[test]
    fn test_parse_update_via_verified_table() {
        let verified = verified_channel("17470", Asset::Eth);
        let update = BitfinexAdapter
            .parse_update(&ticker_frame(17470, 1279.0, 1281.0, 1280.5), &verified)
            .unwrap();
        assert_eq!(update.asset, Asset::Eth);
        assert_eq!(update.price, dec!(1280));
        assert_eq!(update.last_price, dec!(1280.5));
    }
}
