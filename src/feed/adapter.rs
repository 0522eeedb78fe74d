//! Venue adapter contract
//!
//! All per-venue wire differences (batched vs. per-topic subscribe frames,
//! id-based vs. symbol-based update identification, heartbeat handling)
//! are contained behind this trait. The connection and store layers never
//! branch on venue identity; an adapter is selected once at construction.

use crate::error::FeedError;
use crate::feed::venues;
use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, PriceUpdate, Venue};
use serde_json::Value;
use std::sync::Arc;

/// Classification of an inbound frame, checked in fixed precedence order:
/// subscription ack, update, heartbeat, pong, other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    SubscriptionAck,
    Update,
    Heartbeat,
    Pong,
    Other,
}

/// Parsed subscription acknowledgment: the venue-assigned confirmation
/// token and the asset it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    pub token: String,
    pub asset: Asset,
}

/// Pure, stateless translation between the engine's generic message
/// shapes and one venue's wire format.
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Venue-native topics for the given assets. Assets the venue does not
    /// list are skipped.
    fn topics(&self, assets: &[Asset]) -> Vec<Topic>;

    /// Wire payloads subscribing to `topics`. One payload per topic or a
    /// single batched payload, per venue convention. Errors on zero topics;
    /// callers must guard.
    fn subscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError>;

    /// Wire payloads unsubscribing from `topics`. Same shape rules as
    /// `subscribe_frames`.
    fn unsubscribe_frames(&self, topics: &[Topic]) -> Result<Vec<String>, FeedError>;

    /// Application-level ping payload, for venues that need one.
    fn ping_frame(&self) -> Option<String> {
        None
    }

    /// Echoed reply to an unsolicited heartbeat, correlated via an id in
    /// the inbound frame. Venues without heartbeats return None.
    fn heartbeat_reply(&self, _frame: &Value) -> Option<String> {
        None
    }

    /// Classify an inbound frame. Update classification is asset-aware for
    /// venues that only identify updates through the verified-subscription
    /// table: an id missing from the table is not an update.
    fn classify(&self, frame: &Value, verified: &VerifiedSubscriptions) -> FrameKind;

    /// Parse a subscription acknowledgment into `{token, asset}`. Fails
    /// with `UnknownSymbol` when the acked symbol is outside the venue's
    /// known-symbol table.
    fn parse_subscription_ack(&self, _frame: &Value) -> Result<SubscriptionAck, FeedError> {
        Err(FeedError::parse(
            self.venue(),
            "venue does not acknowledge subscriptions",
        ))
    }

    /// Parse an update frame into a normalized tick. A missing or zero
    /// bid, ask or last price is a parse failure, never a valid zero.
    fn parse_update(
        &self,
        frame: &Value,
        verified: &VerifiedSubscriptions,
    ) -> Result<PriceUpdate, FeedError>;
}

/// Select the adapter for a venue key.
pub fn adapter_for(venue: Venue) -> Arc<dyn VenueAdapter> {
    match venue {
        Venue::Binance => Arc::new(venues::binance::BinanceAdapter),
        Venue::Bitfinex => Arc::new(venues::bitfinex::BitfinexAdapter),
        Venue::Coinbase => Arc::new(venues::coinbase::CoinbaseAdapter),
        Venue::CryptoCom => Arc::new(venues::cryptocom::CryptoComAdapter),
        Venue::Ftx => Arc::new(venues::ftx::FtxAdapter),
    }
}
