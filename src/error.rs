//! Error taxonomy for the streaming feed core
//!
//! Nothing here is fatal to the process: connection failures trigger
//! reconnects, frame-level failures surface as error events while the
//! connection stays up.

use crate::types::Venue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport could not open or was forcibly closed. Always recoverable.
    #[error("{venue} connection failed: {reason}")]
    Connection { venue: Venue, reason: String },

    /// Malformed or incomplete inbound frame. The connection stays open.
    #[error("failed to parse {venue} frame: {reason}")]
    Parse { venue: Venue, reason: String },

    /// Venue reported a market outside its known-symbol table.
    #[error("unknown {venue} symbol: {symbol}")]
    UnknownSymbol { venue: Venue, symbol: String },

    /// Send attempted with no transport handle for the venue.
    #[error("no known transport for {venue}")]
    NoTransport { venue: Venue },

    /// A frame builder was invoked with zero topics. Callers must guard.
    #[error("{venue} frame builder called with no topics")]
    EmptyTopics { venue: Venue },
}

impl FeedError {
    pub fn parse(venue: Venue, reason: impl Into<String>) -> Self {
        FeedError::Parse {
            venue,
            reason: reason.into(),
        }
    }

    pub fn unknown_symbol(venue: Venue, symbol: impl Into<String>) -> Self {
        FeedError::UnknownSymbol {
            venue,
            symbol: symbol.into(),
        }
    }
}
