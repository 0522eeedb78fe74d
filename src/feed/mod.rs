//! Streaming feed core
//!
//! One `StreamClient` per venue drives a long-lived WebSocket through its
//! lifecycle state machine, normalizing inbound frames via the venue's
//! adapter into `FeedEvent`s. Bookkeeping (state, desired topics, verified
//! subscriptions) lives in the `ConnectionStore`.

pub mod adapter;
pub mod client;
pub mod store;
pub mod venues;

pub use adapter::{FrameKind, SubscriptionAck, VenueAdapter};
pub use client::{ClientOptions, StreamClient};
pub use store::{ConnectionState, ConnectionStore};

use crate::error::FeedError;
use crate::types::{Asset, PriceUpdate, Venue};
use std::collections::HashMap;

/// A venue-specific subscription descriptor.
///
/// `symbol` is the venue-native market identifier (`ETHUSDT`, `tETHUSD`,
/// `ETH-USD`, ...). Equality is structural: two independently constructed
/// topics for the same channel/symbol pair compare equal, which is what
/// the store relies on for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub channel: String,
    pub symbol: String,
}

impl Topic {
    pub fn ticker(symbol: impl Into<String>) -> Self {
        Self {
            channel: "ticker".to_string(),
            symbol: symbol.into(),
        }
    }
}

/// Venue-assigned confirmation token -> logical asset.
///
/// Entries are added only after an explicit subscription acknowledgment
/// and discarded with the owning connection.
pub type VerifiedSubscriptions = HashMap<String, Asset>;

/// Which handler an operational failure surfaced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ConnectionFailed,
    OnWsMessage,
    OnWsError,
}

/// Events emitted by a `StreamClient`.
///
/// Single-consumer: each client writes to one mpsc channel and the engine
/// owns the receiving end. Fan-out past that point is the consumer's
/// concern.
#[derive(Debug)]
pub enum FeedEvent {
    /// Successfully parsed tick
    Update { venue: Venue, update: PriceUpdate },
    /// First successful open of a connection
    Open { venue: Venue },
    /// Re-open after a reconnect cycle
    Reconnected { venue: Venue },
    /// Reconnect scheduled after an unexpected close
    Reconnect { venue: Venue },
    /// Connection closed without auto-reconnect
    Closed { venue: Venue },
    /// Operational failure; the client keeps running
    Error {
        venue: Venue,
        error: FeedError,
        category: ErrorCategory,
    },
    /// Unclassified inbound frame, passed through for observers
    Response {
        venue: Venue,
        frame: serde_json::Value,
    },
}
