//! Per-venue connection bookkeeping
//!
//! One `ConnectionStore` per process owns a record per venue: the
//! transport handle, the lifecycle state, the desired topic set and the
//! verified-subscription table. The engine runs on the multi-threaded
//! runtime, so the table is lock-guarded; critical sections are short and
//! never await.

use crate::feed::{Topic, VerifiedSubscriptions};
use crate::types::{Asset, Venue};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Connection lifecycle state.
///
/// `Connecting` is only entered from `Initial` (or an absent record);
/// re-dials keep `Reconnecting` until the socket opens so the open handler
/// can tell a reconnect from a first open. `Closing` suppresses
/// auto-reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Connecting,
    Connected,
    Closing,
    Reconnecting,
}

/// Writer-side handle to one physical connection. The writer task owns the
/// socket sink; dropping every clone of the handle closes the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    /// Transport-level liveness: the writer task is still holding the
    /// socket open. Independent of the logical `ConnectionState`.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn send_text(&self, payload: String) -> bool {
        self.sender.send(Message::Text(payload)).is_ok()
    }

    pub fn send_raw(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) {
        let _ = self.sender.send(Message::Close(None));
    }
}

#[derive(Default)]
struct VenueRecord {
    handle: Option<ConnectionHandle>,
    state: Option<ConnectionState>,
    topics: Vec<Topic>,
    verified: VerifiedSubscriptions,
}

/// Bookkeeping table keyed by venue. Records are created on first
/// reference and discarded only on explicit teardown.
#[derive(Default)]
pub struct ConnectionStore {
    records: Mutex<HashMap<Venue, VenueRecord>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(&self, venue: Venue, f: impl FnOnce(&mut VenueRecord) -> T) -> T {
        let mut records = self.records.lock().expect("connection store poisoned");
        let record = records.entry(venue).or_default();
        f(record)
    }

    /* lifecycle state */

    pub fn state(&self, venue: Venue) -> ConnectionState {
        self.with_record(venue, |r| r.state.unwrap_or(ConnectionState::Initial))
    }

    pub fn set_state(&self, venue: Venue, state: ConnectionState) {
        self.with_record(venue, |r| r.state = Some(state));
    }

    pub fn is_state(&self, venue: Venue, state: ConnectionState) -> bool {
        self.state(venue) == state
    }

    /// Whether an explicit state has ever been set for this venue.
    pub fn has_state(&self, venue: Venue) -> bool {
        self.with_record(venue, |r| r.state.is_some())
    }

    /* transport handle */

    pub fn set_handle(&self, venue: Venue, handle: ConnectionHandle) {
        self.with_record(venue, |r| {
            if r.handle.as_ref().map(|h| h.is_open()).unwrap_or(false) {
                warn!(venue = %venue, "replacing existing open connection handle");
            }
            r.handle = Some(handle);
        });
    }

    pub fn handle(&self, venue: Venue) -> Option<ConnectionHandle> {
        self.with_record(venue, |r| r.handle.clone())
    }

    pub fn is_open(&self, venue: Venue) -> bool {
        self.with_record(venue, |r| {
            r.handle.as_ref().map(|h| h.is_open()).unwrap_or(false)
        })
    }

    /* desired topics */

    /// Add a topic unless a structurally equal one is already stored.
    /// Returns the resulting topic set.
    pub fn add_topic(&self, venue: Venue, topic: Topic) -> Vec<Topic> {
        self.with_record(venue, |r| {
            if !r.topics.contains(&topic) {
                r.topics.push(topic);
            }
            r.topics.clone()
        })
    }

    pub fn delete_topic(&self, venue: Venue, topic: &Topic) -> Vec<Topic> {
        self.with_record(venue, |r| {
            r.topics.retain(|t| t != topic);
            r.topics.clone()
        })
    }

    pub fn topics(&self, venue: Venue) -> Vec<Topic> {
        self.with_record(venue, |r| r.topics.clone())
    }

    /* verified subscriptions */

    /// Idempotent upsert of a confirmation token. Only called after an
    /// explicit subscription acknowledgment.
    pub fn verify_subscription(&self, venue: Venue, token: String, asset: Asset) {
        self.with_record(venue, |r| {
            r.verified.insert(token, asset);
        });
    }

    pub fn verified(&self, venue: Venue) -> VerifiedSubscriptions {
        self.with_record(venue, |r| r.verified.clone())
    }

    /// A fresh physical connection starts with an empty table; every
    /// subscription must be re-acknowledged.
    pub fn clear_verified(&self, venue: Venue) {
        self.with_record(venue, |r| r.verified.clear());
    }

    /* teardown */

    pub fn remove(&self, venue: Venue) {
        let mut records = self.records.lock().expect("connection store poisoned");
        if let Some(record) = records.remove(&venue) {
            if let Some(handle) = record.handle {
                if handle.is_open() {
                    warn!(venue = %venue, "removing record for connection still open");
                    handle.close();
                }
            }
        }
    }
}
