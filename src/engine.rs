//! Feed orchestration
//!
//! Wires one `StreamClient` per enabled venue into a shared event channel
//! and folds the resulting stream into the `PriceStore`. The engine is the
//! single consumer of feed events; alerts fan out through their own
//! channel.

use crate::aggregator::{DeviationAlert, PriceStore};
use crate::config::AppConfig;
use crate::feed::store::ConnectionStore;
use crate::feed::{ErrorCategory, FeedEvent, StreamClient};
use crate::types::{Asset, Venue};
use crate::util::{ScheduledTask, ScheduledTaskOptions};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub type SharedPriceStore = Arc<Mutex<PriceStore>>;

pub struct FeedEngine {
    assets: Vec<Asset>,
    clients: HashMap<Venue, StreamClient>,
    store: Arc<ConnectionStore>,
    prices: SharedPriceStore,
    events: mpsc::UnboundedReceiver<FeedEvent>,
}

impl FeedEngine {
    /// Build the engine from configuration. Returns the engine plus the
    /// receiving end of the deviation alert channel.
    pub fn new(config: &AppConfig) -> Result<(Self, mpsc::UnboundedReceiver<DeviationAlert>)> {
        let (alerts_tx, alerts_rx) = mpsc::unbounded_channel();
        let (default_threshold, overrides) = config.thresholds()?;
        let prices = Arc::new(Mutex::new(PriceStore::with_thresholds(
            alerts_tx,
            default_threshold,
            overrides,
        )));

        let store = Arc::new(ConnectionStore::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut clients = HashMap::new();
        for venue in config.venues.enabled_venues() {
            let options = config.venues.venue(venue).client_options();
            let client = StreamClient::new(venue, options, store.clone(), events_tx.clone());
            clients.insert(venue, client);
        }

        Ok((
            Self {
                assets: config.assets(),
                clients,
                store,
                prices,
                events: events_rx,
            },
            alerts_rx,
        ))
    }

    pub fn prices(&self) -> SharedPriceStore {
        self.prices.clone()
    }

    pub fn connection_store(&self) -> Arc<ConnectionStore> {
        self.store.clone()
    }

    pub fn client(&self, venue: Venue) -> Option<&StreamClient> {
        self.clients.get(&venue)
    }

    /// Subscribe every client to its venue's topics for the configured
    /// assets. Connections open lazily from the subscribe call.
    pub fn start(&self) {
        for client in self.clients.values() {
            let topics = client.adapter().topics(&self.assets);
            if topics.is_empty() {
                warn!(venue = %client.venue(), "venue lists none of the configured assets");
                continue;
            }
            info!(venue = %client.venue(), count = topics.len(), "subscribing");
            client.subscribe(topics);
        }
    }

    /// Periodically warn about venue feeds that have gone quiet for an
    /// asset. Stale entries keep contributing to the median; acting on the
    /// warnings is left to whoever publishes from this store. Dropping the
    /// returned task stops the check.
    pub fn start_staleness_watchdog(
        &self,
        interval: Duration,
        max_age: chrono::Duration,
    ) -> ScheduledTask {
        let prices = self.prices.clone();
        let assets = self.assets.clone();
        ScheduledTask::spawn(interval, ScheduledTaskOptions::default(), move || {
            let prices = prices.clone();
            let assets = assets.clone();
            async move {
                let now = Utc::now();
                let store = prices.lock().expect("price store poisoned");
                for &asset in &assets {
                    for (venue, observed_at) in store.stale_observations(asset, max_age, now) {
                        warn!(
                            venue = %venue,
                            asset = %asset,
                            age_s = (now - observed_at).num_seconds(),
                            "venue feed has gone stale"
                        );
                    }
                }
                Ok(())
            }
        })
    }

    /// Close every connection and suppress reconnects. Sessions wind down
    /// asynchronously; `run` keeps draining their final events.
    pub fn shutdown(&self) {
        for client in self.clients.values() {
            client.close();
        }
    }

    /// Consume feed events until every sender is gone. Intended to be
    /// driven from the main task, racing a shutdown signal.
    pub async fn run(&mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
    }

    fn handle_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Update { venue, update } => {
                let mut prices = self.prices.lock().expect("price store poisoned");
                prices.store_venue_price(venue, &update);
            }
            FeedEvent::Open { venue } => {
                info!(venue = %venue, "feed open");
            }
            FeedEvent::Reconnected { venue } => {
                info!(venue = %venue, "feed reconnected");
            }
            FeedEvent::Reconnect { venue } => {
                warn!(venue = %venue, "feed lost, reconnect scheduled");
            }
            FeedEvent::Closed { venue } => {
                info!(venue = %venue, "feed closed");
            }
            FeedEvent::Error {
                venue,
                error,
                category,
            } => match category {
                ErrorCategory::ConnectionFailed => {
                    error!(venue = %venue, error = %error, "feed connection failed")
                }
                ErrorCategory::OnWsMessage => {
                    warn!(venue = %venue, error = %error, "feed message error")
                }
                ErrorCategory::OnWsError => {
                    error!(venue = %venue, error = %error, "feed transport error")
                }
            },
            FeedEvent::Response { venue, frame } => {
                tracing::debug!(venue = %venue, frame = %frame, "unclassified frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceUpdate;
    use rust_decimal_macros::dec;

    fn engine() -> (FeedEngine, mpsc::UnboundedReceiver<DeviationAlert>) {
        FeedEngine::new(&AppConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_builds_one_client_per_enabled_venue() {
        let (engine, _alerts) = engine();
        assert!(engine.client(Venue::Binance).is_some());
        assert!(engine.client(Venue::Ftx).is_none());
    }

    #[tokio::test]
    async fn test_update_events_reach_the_price_store() {
        let (engine, _alerts) = engine();
        engine.handle_event(FeedEvent::Update {
            venue: Venue::Binance,
            update: PriceUpdate {
                asset: Asset::Eth,
                price: dec!(2000),
                last_price: dec!(2000),
            },
        });
        let prices = engine.prices();
        let prices = prices.lock().unwrap();
        assert_eq!(prices.median_price(Asset::Eth), Some(dec!(2000)));
    }
}
