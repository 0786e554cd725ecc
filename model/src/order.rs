use crate::money::{Btc, Usd};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    Live,
    Fulfilled,
    Cancelled,
}

impl FromStr for OrderKind {
    type Err = ();

    /// Case insensitive, matching what clients send over the wire.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("buy") {
            Ok(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Ok(Self::Sell)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Live => f.write_str("LIVE"),
            Self::Fulfilled => f.write_str("FULFILLED"),
            Self::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

/// An order resting on (or admitted to) the book.
///
/// `quantity` is the remaining unfilled quantity; `quantity +
/// filled_quantity` stays constant over the order's lifetime. `filled_price`
/// accumulates the USD notional across fills. A `limit_price` of zero marks
/// a market order, which only exists for the duration of its own
/// transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StandingOrder {
    pub id: i64,
    pub account_id: i64,
    pub kind: OrderKind,
    pub state: OrderState,
    pub quantity: Btc,
    pub filled_quantity: Btc,
    pub filled_price: Usd,
    pub limit_price: Usd,
    pub reserved_usd_amount: Usd,
    pub reserved_btc_amount: Btc,
    pub webhook_url: Option<String>,
}
