//! Price aggregation store
//!
//! Keeps the latest price per (asset, venue), derives the order-independent
//! median across venues and raises a deviation alert when the live median
//! diverges from the last published reference value beyond the asset's
//! threshold. The median is always re-derived from the full per-venue
//! table, so the result never depends on arrival order.

use crate::types::{Asset, AssetPrice, PriceUpdate, Venue};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_DEVIATION_THRESHOLD: Decimal = dec!(0.0012);

/// Live median diverged from the reference value beyond the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviationAlert {
    pub asset: Asset,
    pub median_price: Decimal,
    pub reference_price: Decimal,
}

#[derive(Debug, Clone)]
struct VenuePrice {
    price: Decimal,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AssetRecord {
    venues: HashMap<Venue, VenuePrice>,
    median: Option<Decimal>,
    reference: Option<Decimal>,
    /// Set when an alert fires; cleared when the reference advances. The
    /// alert does not re-fire while a publish is pending.
    alerted: bool,
}

/// Aggregation store written by every venue's update handler.
///
/// Alerts go out on a single-consumer channel handed in at construction;
/// the reference value only advances through `set_reference`, never from
/// a recompute, so a genuine deviation is not suppressed while a publish
/// is in flight.
pub struct PriceStore {
    records: HashMap<Asset, AssetRecord>,
    thresholds: HashMap<Asset, Decimal>,
    default_threshold: Decimal,
    alerts: mpsc::UnboundedSender<DeviationAlert>,
}

impl PriceStore {
    pub fn new(alerts: mpsc::UnboundedSender<DeviationAlert>) -> Self {
        Self {
            records: HashMap::new(),
            thresholds: HashMap::new(),
            default_threshold: DEFAULT_DEVIATION_THRESHOLD,
            alerts,
        }
    }

    pub fn with_thresholds(
        alerts: mpsc::UnboundedSender<DeviationAlert>,
        default_threshold: Decimal,
        thresholds: HashMap<Asset, Decimal>,
    ) -> Self {
        Self {
            records: HashMap::new(),
            thresholds,
            default_threshold,
            alerts,
        }
    }

    /// Store one venue's latest price for an asset and recompute. A zero
    /// price is never stored; no venue publishes a true zero.
    pub fn store_venue_price(&mut self, venue: Venue, update: &PriceUpdate) {
        self.store_price(venue, update, true);
    }

    /// Batch form used by snapshot pollers. Snapshot fills refresh the
    /// per-venue table and the median but never run the deviation
    /// comparison; only streaming updates can raise alerts.
    pub fn store_venue_prices(&mut self, venue: Venue, updates: &[PriceUpdate]) {
        for update in updates {
            self.store_price(venue, update, false);
        }
    }

    fn store_price(&mut self, venue: Venue, update: &PriceUpdate, compare: bool) {
        if update.price.is_zero() {
            warn!(venue = %venue, asset = %update.asset, "refusing to store zero price");
            return;
        }
        debug!(venue = %venue, asset = %update.asset, price = %update.price, "storing price");
        let record = self.records.entry(update.asset).or_default();
        record.venues.insert(
            venue,
            VenuePrice {
                price: update.price,
                observed_at: Utc::now(),
            },
        );
        self.recompute_with(update.asset, compare);
    }

    /// Re-derive the median for an asset from the full per-venue table and
    /// compare it against the reference value. The first median seeds the
    /// reference without alerting.
    pub fn recompute(&mut self, asset: Asset) {
        self.recompute_with(asset, true);
    }

    fn recompute_with(&mut self, asset: Asset, compare: bool) {
        let threshold = self
            .thresholds
            .get(&asset)
            .copied()
            .unwrap_or(self.default_threshold);
        let Some(record) = self.records.get_mut(&asset) else {
            warn!(asset = %asset, "no known prices for asset");
            return;
        };
        let prices: Vec<Decimal> = record.venues.values().map(|v| v.price).collect();
        let Some(median) = median(&prices) else {
            return;
        };
        record.median = Some(median);
        if !compare {
            return;
        }

        let Some(reference) = record.reference else {
            debug!(asset = %asset, median = %median, "seeding reference from first median");
            record.reference = Some(median);
            return;
        };

        let deviation = ((reference - median) / reference).abs();
        if deviation > threshold && !record.alerted {
            record.alerted = true;
            let alert = DeviationAlert {
                asset,
                median_price: median,
                reference_price: reference,
            };
            let _ = self.alerts.send(alert);
        }
    }

    /// Advance the reference value after a completed publish. Re-arms
    /// deviation alerting for the asset.
    pub fn set_reference(&mut self, asset: Asset, price: Decimal) {
        let record = self.records.entry(asset).or_default();
        record.reference = Some(price);
        record.alerted = false;
    }

    pub fn set_reference_prices(&mut self, prices: &[AssetPrice]) {
        for entry in prices {
            self.set_reference(entry.asset, entry.price);
        }
    }

    pub fn reference(&self, asset: Asset) -> Option<Decimal> {
        self.records.get(&asset).and_then(|r| r.reference)
    }

    pub fn median_price(&self, asset: Asset) -> Option<Decimal> {
        self.records.get(&asset).and_then(|r| r.median)
    }

    /// Snapshot of the current median per known asset.
    pub fn median_prices(&self) -> Vec<AssetPrice> {
        let mut snapshot: Vec<AssetPrice> = self
            .records
            .iter()
            .filter_map(|(&asset, record)| {
                record.median.map(|price| AssetPrice { asset, price })
            })
            .collect();
        snapshot.sort_by_key(|p| p.asset);
        snapshot
    }

    /// Per-venue contributions for an asset, with observation times.
    /// Staleness policy is the consumer's concern, not this store's.
    pub fn venue_observations(&self, asset: Asset) -> Vec<(Venue, Decimal, DateTime<Utc>)> {
        self.records
            .get(&asset)
            .map(|record| {
                record
                    .venues
                    .iter()
                    .map(|(&venue, price)| (venue, price.price, price.observed_at))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Venue contributions whose last observation is older than `max_age`
    /// at `now`. Stale entries keep contributing to the median; what to do
    /// about them is the caller's call.
    pub fn stale_observations(
        &self,
        asset: Asset,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(Venue, DateTime<Utc>)> {
        self.venue_observations(asset)
            .into_iter()
            .filter(|(_, _, observed_at)| now - *observed_at > max_age)
            .map(|(venue, _, observed_at)| (venue, observed_at))
            .collect()
    }
}

/// Median of a price list: sort descending, middle element for odd
/// counts, mean of the two central elements for even counts.
pub fn median(prices: &[Decimal]) -> Option<Decimal> {
    if prices.is_empty() {
        return None;
    }
    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| b.cmp(a));
    let half = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[half])
    } else {
        Some((sorted[half - 1] + sorted[half]) / Decimal::TWO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(asset: Asset, price: Decimal) -> PriceUpdate {
        PriceUpdate {
            asset,
            price,
            last_price: price,
        }
    }

    fn store_with_alerts() -> (PriceStore, mpsc::UnboundedReceiver<DeviationAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PriceStore::new(tx), rx)
    }

    #[test]
    fn test_median_odd_takes_middle() {
        let prices = vec![dec!(1000), dec!(1001), dec!(999)];
        assert_eq!(median(&prices), Some(dec!(1000)));
    }

    #[test]
    fn test_median_even_averages_central_pair() {
        assert_eq!(median(&[dec!(999), dec!(1001)]), Some(dec!(1000)));
        assert_eq!(
            median(&[dec!(4), dec!(1), dec!(3), dec!(2)]),
            Some(dec!(2.5))
        );
    }

    #[test]
    fn test_median_single_and_empty() {
        assert_eq!(median(&[dec!(42)]), Some(dec!(42)));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_median_tolerates_ties() {
        assert_eq!(median(&[dec!(5), dec!(5), dec!(5), dec!(5)]), Some(dec!(5)));
    }

    #[test]
    fn test_median_is_order_independent() {
        let base = vec![dec!(999), dec!(1000), dec!(1001), dec!(1003)];
        let expected = median(&base);
        let permutations = [
            vec![dec!(1003), dec!(999), dec!(1001), dec!(1000)],
            vec![dec!(1000), dec!(1003), dec!(999), dec!(1001)],
            vec![dec!(1001), dec!(1000), dec!(1003), dec!(999)],
        ];
        for permutation in &permutations {
            assert_eq!(median(permutation), expected);
        }
    }

    #[test]
    fn test_zero_price_is_not_stored() {
        let (mut store, _rx) = store_with_alerts();
        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(0)));
        assert_eq!(store.median_price(Asset::Eth), None);
        assert!(store.median_prices().is_empty());
    }

    #[test]
    fn test_first_median_seeds_reference_without_alert() {
        let (mut store, mut rx) = store_with_alerts();
        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(999)));
        assert_eq!(store.reference(Asset::Eth), Some(dec!(999)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_three_venue_running_medians() {
        let (mut store, mut rx) = store_with_alerts();

        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(999)));
        assert_eq!(store.median_price(Asset::Eth), Some(dec!(999)));

        store.store_venue_price(Venue::Coinbase, &update(Asset::Eth, dec!(1001)));
        assert_eq!(store.median_price(Asset::Eth), Some(dec!(1000)));

        store.store_venue_price(Venue::Ftx, &update(Asset::Eth, dec!(1000)));
        assert_eq!(store.median_price(Asset::Eth), Some(dec!(1000)));

        // reference seeded at 999; 1000 vs 999 is ~0.1%, within the
        // 0.12% default threshold, so no alert ever fires
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deviation_alert_fires_once_per_reference_epoch() {
        let (mut store, mut rx) = store_with_alerts();

        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(16800)));
        assert!(rx.try_recv().is_err());

        // > 0.12% away from reference
        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(16900)));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.asset, Asset::Btc);
        assert_eq!(alert.median_price, dec!(16900));
        assert_eq!(alert.reference_price, dec!(16800));

        // still deviating: recompute must not re-fire while publish pends
        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(16950)));
        assert!(rx.try_recv().is_err());

        // publish completed; alerting re-arms
        store.set_reference(Asset::Btc, dec!(16950));
        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(17100)));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.reference_price, dec!(16950));
    }

    #[test]
    fn test_per_asset_threshold_override() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut store = PriceStore::with_thresholds(
            tx,
            DEFAULT_DEVIATION_THRESHOLD,
            HashMap::from([(Asset::Crv, dec!(0.005))]),
        );

        store.store_venue_price(Venue::Binance, &update(Asset::Crv, dec!(1.000)));
        // 0.3% deviation: above the default but below the CRV override
        store.store_venue_price(Venue::Binance, &update(Asset::Crv, dec!(1.003)));
        assert!(rx.try_recv().is_err());

        store.store_venue_price(Venue::Binance, &update(Asset::Crv, dec!(1.006)));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_snapshot_batch_refreshes_median_without_alerting() {
        let (mut store, mut rx) = store_with_alerts();
        store.set_reference(Asset::Btc, dec!(16800));

        // well past every threshold, but snapshots never compare
        store.store_venue_prices(Venue::Binance, &[update(Asset::Btc, dec!(18000))]);
        assert_eq!(store.median_price(Asset::Btc), Some(dec!(18000)));
        assert!(rx.try_recv().is_err());

        // the streaming path still compares against the same reference
        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(18100)));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.reference_price, dec!(16800));
    }

    #[test]
    fn test_stale_observations_respect_max_age() {
        let (mut store, _rx) = store_with_alerts();
        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(1000)));

        let now = Utc::now();
        assert!(store
            .stale_observations(Asset::Eth, Duration::seconds(60), now)
            .is_empty());

        let later = now + Duration::seconds(120);
        let stale = store.stale_observations(Asset::Eth, Duration::seconds(60), later);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, Venue::Binance);
    }

    #[test]
    fn test_quiet_venue_keeps_contributing_last_price() {
        let (mut store, _rx) = store_with_alerts();
        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(1000)));
        store.store_venue_price(Venue::Coinbase, &update(Asset::Eth, dec!(1002)));
        // binance goes quiet; its entry is overwritten per-venue, never deleted
        store.store_venue_price(Venue::Coinbase, &update(Asset::Eth, dec!(1004)));
        assert_eq!(store.median_price(Asset::Eth), Some(dec!(1002)));
    }

    #[test]
    fn test_median_prices_snapshot() {
        let (mut store, _rx) = store_with_alerts();
        store.store_venue_price(Venue::Binance, &update(Asset::Eth, dec!(1000)));
        store.store_venue_price(Venue::Binance, &update(Asset::Btc, dec!(16800)));
        let snapshot = store.median_prices();
        assert_eq!(
            snapshot,
            vec![
                AssetPrice { asset: Asset::Btc, price: dec!(16800) },
                AssetPrice { asset: Asset::Eth, price: dec!(1000) },
            ]
        );
    }
}
