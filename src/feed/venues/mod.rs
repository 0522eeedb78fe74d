//! Per-venue adapter implementations

pub mod binance;
pub mod bitfinex;
pub mod coinbase;
pub mod cryptocom;
pub mod ftx;

pub use binance::BinanceAdapter;
pub use bitfinex::BitfinexAdapter;
pub use coinbase::CoinbaseAdapter;
pub use cryptocom::CryptoComAdapter;
pub use ftx::FtxAdapter;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Read a price field that venues encode as either a JSON string or a
/// number. Absent and zero are both "missing": no venue publishes a true
/// zero price, so zero always means incomplete data.
pub(crate) fn price_value(value: &Value) -> Option<Decimal> {
    let price = match value {
        Value::String(s) => Decimal::from_str(s).ok()?,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Decimal::from(i)
            } else {
                Decimal::from_f64(n.as_f64()?)?
            }
        }
        _ => return None,
    };
    if price.is_zero() {
        None
    } else {
        Some(price)
    }
}

/// Mid of best bid/ask.
pub(crate) fn mid_price(bid: Decimal, ask: Decimal) -> Decimal {
    (bid + ask) / Decimal::TWO
}
