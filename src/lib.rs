//! Pricekeeper
//!
//! Multi-venue price ingestion and aggregation: streams tickers from
//! several exchanges over WebSocket, keeps a running per-asset median,
//! and raises alerts when the median drifts from a reference price.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod poller;
pub mod types;
pub mod util;
