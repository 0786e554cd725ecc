use crate::money::{Btc, Usd};

/// A user account with its settled balances.
///
/// Balances never go negative; the storage layer enforces the guard on every
/// delta update. Funds earmarked by live orders are tracked on the orders
/// themselves and derived per account by summation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub token: String,
    pub usd_amount: Usd,
    pub btc_amount: Btc,
}
