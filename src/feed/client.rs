//! Per-venue streaming client
//!
//! Owns one physical WebSocket per venue and drives it through the
//! lifecycle state machine: dial, subscribe, liveness ping/pong, dispatch,
//! reconnect. Inbound frames go through the venue's adapter; everything
//! the consumer sees is a normalized `FeedEvent`. A venue outage never
//! crashes the process — operational failures surface as error events and
//! the client keeps cycling.

use crate::error::FeedError;
use crate::feed::adapter::{adapter_for, FrameKind, VenueAdapter};
use crate::feed::store::{ConnectionHandle, ConnectionState, ConnectionStore};
use crate::feed::{ErrorCategory, FeedEvent, Topic};
use crate::types::Venue;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Per-venue connection tuning. The defaults are deliberately aggressive:
/// a market-data gap is worse than a redundant reconnect.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_on_close: bool,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Duration::from_millis(10_000),
            pong_timeout: Duration::from_millis(7_500),
            reconnect_delay: Duration::from_millis(500),
            reconnect_on_close: true,
        }
    }
}

/// One streaming connection to one venue.
///
/// Cloning is cheap; clones share the same store record and event channel.
/// Methods must be called from within a tokio runtime.
#[derive(Clone)]
pub struct StreamClient {
    venue: Venue,
    adapter: Arc<dyn VenueAdapter>,
    options: ClientOptions,
    store: Arc<ConnectionStore>,
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl StreamClient {
    pub fn new(
        venue: Venue,
        options: ClientOptions,
        store: Arc<ConnectionStore>,
        events: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        Self {
            venue,
            adapter: adapter_for(venue),
            options,
            store,
            events,
        }
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn adapter(&self) -> &Arc<dyn VenueAdapter> {
        &self.adapter
    }

    /// Add topics to the subscription list. Already-connected venues get
    /// the subscribe request immediately; otherwise the connection process
    /// starts and topics are subscribed on open.
    pub fn subscribe(&self, topics: impl IntoIterator<Item = Topic>) {
        let mut added = Vec::new();
        for topic in topics {
            self.store.add_topic(self.venue, topic.clone());
            added.push(topic);
        }
        if added.is_empty() {
            return;
        }

        if self.store.is_state(self.venue, ConnectionState::Connected) {
            self.request_subscribe(&added);
        } else if !self.store.is_state(self.venue, ConnectionState::Connecting)
            && !self.store.is_state(self.venue, ConnectionState::Reconnecting)
        {
            self.connect();
        }
    }

    /// Remove topics from the subscription list; an unsubscribe request is
    /// only necessary while a connection is active.
    pub fn unsubscribe(&self, topics: impl IntoIterator<Item = Topic>) {
        let removed: Vec<Topic> = topics.into_iter().collect();
        for topic in &removed {
            self.store.delete_topic(self.venue, topic);
        }
        if removed.is_empty() {
            return;
        }

        if self.store.is_state(self.venue, ConnectionState::Connected) {
            let result = self
                .adapter
                .unsubscribe_frames(&removed)
                .and_then(|frames| self.send_frames(frames));
            if let Err(err) = result {
                error!(venue = %self.venue, error = %err, "unsubscribe request failed");
            }
        }
    }

    /// Start the connection process. A no-op (with a logged error) when a
    /// connection is already open or an attempt is already active.
    pub fn connect(&self) {
        if self.store.is_open(self.venue) {
            error!(venue = %self.venue, "refused to connect: existing active connection");
            return;
        }
        if self.store.is_state(self.venue, ConnectionState::Connecting) {
            error!(venue = %self.venue, "refused to connect: connection attempt already active");
            return;
        }
        // a re-dial keeps Reconnecting so the open handler can tell the
        // two arrivals apart
        if !self.store.has_state(self.venue) || self.store.is_state(self.venue, ConnectionState::Initial)
        {
            self.store.set_state(self.venue, ConnectionState::Connecting);
        }

        let client = self.clone();
        tokio::spawn(async move { client.run_session().await });
    }

    /// Caller-initiated shutdown; suppresses auto-reconnect.
    pub fn close(&self) {
        info!(venue = %self.venue, "closing connection");
        self.store.set_state(self.venue, ConnectionState::Closing);
        if let Some(handle) = self.store.handle(self.venue) {
            handle.close();
        }
    }

    /* session loop */

    async fn run_session(&self) {
        loop {
            info!(venue = %self.venue, url = %self.options.url, "opening connection");

            let ws = match connect_async(self.options.url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(err) => {
                    error!(venue = %self.venue, error = %err, "connection failed");
                    self.emit(FeedEvent::Error {
                        venue: self.venue,
                        error: FeedError::Connection {
                            venue: self.venue,
                            reason: err.to_string(),
                        },
                        category: ErrorCategory::ConnectionFailed,
                    });
                    if !self.schedule_reconnect().await {
                        return;
                    }
                    continue;
                }
            };

            if self.store.is_state(self.venue, ConnectionState::Closing) {
                // close() raced the dial; do not enter the session
                self.store.set_state(self.venue, ConnectionState::Initial);
                self.emit(FeedEvent::Closed { venue: self.venue });
                return;
            }

            self.on_open();

            let (mut sink, mut stream) = ws.split();

            // writer task owns the sink; the handle is the only way to send
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            let writer_venue = self.venue;
            let writer = tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = sink.send(message).await {
                        warn!(venue = %writer_venue, error = %err, "send failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let handle = ConnectionHandle::new(tx);
            self.store.set_handle(self.venue, handle.clone());

            // reconnection transparency: re-issue every stored topic
            let topics = self.store.topics(self.venue);
            if !topics.is_empty() {
                self.request_subscribe(&topics);
            }

            self.read_loop(&handle, &mut stream).await;

            handle.close();
            let _ = writer.await;

            if !self.store.is_state(self.venue, ConnectionState::Closing)
                && self.options.reconnect_on_close
            {
                self.emit(FeedEvent::Reconnect { venue: self.venue });
                if !self.schedule_reconnect().await {
                    return;
                }
            } else {
                info!(venue = %self.venue, "connection closed");
                self.store.set_state(self.venue, ConnectionState::Initial);
                self.emit(FeedEvent::Closed { venue: self.venue });
                return;
            }
        }
    }

    /// Transition to Reconnecting and wait out the configured delay.
    /// Returns false when the session should stop instead (explicit close
    /// or auto-reconnect disabled).
    async fn schedule_reconnect(&self) -> bool {
        if self.store.is_state(self.venue, ConnectionState::Closing) || !self.options.reconnect_on_close
        {
            self.store.set_state(self.venue, ConnectionState::Initial);
            self.emit(FeedEvent::Closed { venue: self.venue });
            return false;
        }
        // a dial that never opened is still a first connect; the next
        // successful open should report Open, not Reconnected
        if !self.store.is_state(self.venue, ConnectionState::Connecting) {
            self.store.set_state(self.venue, ConnectionState::Reconnecting);
        }
        info!(venue = %self.venue, delay_ms = self.options.reconnect_delay.as_millis() as u64, "reconnecting after delay");
        tokio::time::sleep(self.options.reconnect_delay).await;
        if self.store.is_state(self.venue, ConnectionState::Closing) {
            self.store.set_state(self.venue, ConnectionState::Initial);
            self.emit(FeedEvent::Closed { venue: self.venue });
            return false;
        }
        true
    }

    fn on_open(&self) {
        if self.store.is_state(self.venue, ConnectionState::Connecting) {
            info!(venue = %self.venue, "connected");
            self.emit(FeedEvent::Open { venue: self.venue });
        } else if self.store.is_state(self.venue, ConnectionState::Reconnecting) {
            info!(venue = %self.venue, "reconnected");
            self.emit(FeedEvent::Reconnected { venue: self.venue });
        }
        self.store.set_state(self.venue, ConnectionState::Connected);
        // verified entries die with the previous physical connection
        self.store.clear_verified(self.venue);
    }

    async fn read_loop(
        &self,
        handle: &ConnectionHandle,
        stream: &mut (impl futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) {
        let has_ping = self.adapter.ping_frame().is_some();
        let mut ping_interval = has_ping.then(|| {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + self.options.ping_interval,
                self.options.ping_interval,
            );
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval
        });
        let mut pong_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        // any inbound traffic counts as liveness
                        pong_deadline = None;
                        self.handle_frame(handle, &text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        pong_deadline = None;
                        let _ = handle.send_raw(Message::Pong(payload));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(venue = %self.venue, "connection closed by server");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(venue = %self.venue, error = %err, "websocket error");
                        if self.store.is_state(self.venue, ConnectionState::Connected) {
                            self.emit(FeedEvent::Error {
                                venue: self.venue,
                                error: FeedError::Connection {
                                    venue: self.venue,
                                    reason: err.to_string(),
                                },
                                category: ErrorCategory::OnWsError,
                            });
                        }
                        return;
                    }
                },
                _ = tick(&mut ping_interval), if has_ping => {
                    if let Some(frame) = self.adapter.ping_frame() {
                        debug!(venue = %self.venue, "sending ping");
                        handle.send_text(frame);
                        pong_deadline = Some(tokio::time::Instant::now() + self.options.pong_timeout);
                    }
                },
                _ = expire(pong_deadline), if pong_deadline.is_some() => {
                    // expected, recoverable liveness failure: close the
                    // socket and let the reconnect path take over
                    info!(venue = %self.venue, "pong timeout, closing socket to reconnect");
                    return;
                },
            }
        }
    }

    fn handle_frame(&self, handle: &ConnectionHandle, text: &str) {
        let frame: serde_json::Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(venue = %self.venue, error = %err, "unparseable frame");
                self.emit(FeedEvent::Error {
                    venue: self.venue,
                    error: FeedError::parse(self.venue, err.to_string()),
                    category: ErrorCategory::OnWsMessage,
                });
                return;
            }
        };

        let verified = self.store.verified(self.venue);
        match self.adapter.classify(&frame, &verified) {
            FrameKind::SubscriptionAck => match self.adapter.parse_subscription_ack(&frame) {
                Ok(ack) => {
                    debug!(venue = %self.venue, token = %ack.token, asset = %ack.asset, "subscription verified");
                    self.store.verify_subscription(self.venue, ack.token, ack.asset);
                }
                Err(err) => self.emit(FeedEvent::Error {
                    venue: self.venue,
                    error: err,
                    category: ErrorCategory::OnWsMessage,
                }),
            },
            FrameKind::Update => match self.adapter.parse_update(&frame, &verified) {
                Ok(update) => self.emit(FeedEvent::Update {
                    venue: self.venue,
                    update,
                }),
                Err(err) => self.emit(FeedEvent::Error {
                    venue: self.venue,
                    error: err,
                    category: ErrorCategory::OnWsMessage,
                }),
            },
            FrameKind::Heartbeat => {
                if let Some(reply) = self.adapter.heartbeat_reply(&frame) {
                    handle.send_text(reply);
                }
            }
            FrameKind::Pong => {
                debug!(venue = %self.venue, "received pong");
            }
            FrameKind::Other => self.emit(FeedEvent::Response {
                venue: self.venue,
                frame,
            }),
        }
    }

    fn request_subscribe(&self, topics: &[Topic]) {
        let result = self
            .adapter
            .subscribe_frames(topics)
            .and_then(|frames| self.send_frames(frames));
        if let Err(err) = result {
            error!(venue = %self.venue, error = %err, "subscribe request failed");
        }
    }

    fn send_frames(&self, frames: Vec<String>) -> Result<(), FeedError> {
        let Some(handle) = self.store.handle(self.venue) else {
            return Err(FeedError::NoTransport { venue: self.venue });
        };
        for frame in frames {
            debug!(venue = %self.venue, frame = %frame, "sending upstream frame");
            if !handle.send_text(frame) {
                return Err(FeedError::NoTransport { venue: self.venue });
            }
        }
        Ok(())
    }

    fn emit(&self, event: FeedEvent) {
        let _ = self.events.send(event);
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
