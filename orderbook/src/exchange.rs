//! The matching and balance engine.
//!
//! Every top level call runs inside exactly one serializable database
//! transaction: admission checks, best-match lookups and settlements either
//! all commit together or all roll back. The engine performs no retries;
//! serialization failures surface as [`EngineError::StoreConflict`] and the
//! caller decides whether to re-invoke.

use crate::database::{accounts, orders, Database};
use model::money::{Btc, Usd, BTC_BASE};
use model::{Account, OrderKind, OrderState, StandingOrder};
use sqlx::PgConnection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("limit price must not be negative")]
    NegativeLimitPrice,
    #[error("username is already taken")]
    DuplicateUsername,
    #[error("account or order not found")]
    NotFound,
    #[error("invalid transfer from seller")]
    InvalidTransferFromSeller,
    #[error("invalid transfer to buyer")]
    InvalidTransferToBuyer,
    #[error("conflicting concurrent transaction")]
    StoreConflict,
    #[error("store error: {0}")]
    Store(sqlx::Error),
}

const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SERIALIZATION_FAILURE) {
                return Self::StoreConflict;
            }
        }
        Self::Store(err)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

pub struct StandingOrderParams {
    pub account_id: i64,
    pub kind: OrderKind,
    pub quantity: Btc,
    pub limit_price: Usd,
    pub webhook_url: Option<String>,
}

pub struct MarketOrderParams {
    pub account_id: i64,
    pub kind: OrderKind,
    pub quantity: Btc,
}

/// The outcome of admitting a standing order, including every order the
/// call touched: the new order first, then the counter-parties in matching
/// order. The list feeds webhook notification after commit.
#[derive(Debug)]
pub struct StandingOrderPlacement {
    pub order: StandingOrder,
    pub affected_order_ids: Vec<i64>,
}

/// The outcome of a market order. Market orders never rest on the book, so
/// only the fill totals and the touched counter-parties remain.
#[derive(Debug)]
pub struct MarketOrderFill {
    pub filled_quantity: Btc,
    pub filled_price: Usd,
    pub affected_order_ids: Vec<i64>,
}

pub struct Exchange {
    database: Database,
}

impl Exchange {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn register_account(&self, username: &str) -> Result<Account, EngineError> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut tx = self.database.begin_serializable().await?;
        let account = accounts::create_account(&mut tx, username, &token)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EngineError::DuplicateUsername
                } else {
                    err.into()
                }
            })?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn account_by_token(&self, token: &str) -> Result<Option<Account>, EngineError> {
        let mut conn = self.database.connection().await?;
        Ok(accounts::get_account_by_token(&mut conn, token).await?)
    }

    pub async fn account_by_id(&self, id: i64) -> Result<Option<Account>, EngineError> {
        let mut conn = self.database.connection().await?;
        Ok(accounts::get_account_by_id(&mut conn, id).await?)
    }

    pub async fn standing_order(&self, id: i64) -> Result<Option<StandingOrder>, EngineError> {
        let mut conn = self.database.connection().await?;
        Ok(orders::get_standing_order(&mut conn, id).await?)
    }

    pub async fn standing_orders(&self, ids: &[i64]) -> Result<Vec<StandingOrder>, EngineError> {
        let mut conn = self.database.connection().await?;
        Ok(orders::get_standing_orders(&mut conn, ids).await?)
    }

    /// Moves funds into or out of the account (withdrawals use negative
    /// deltas). Returns false without changing anything when the resulting
    /// balance would go negative.
    pub async fn deposit(
        &self,
        account_id: i64,
        btc_amount: Btc,
        usd_amount: Usd,
    ) -> Result<bool, EngineError> {
        let mut tx = self.database.begin_serializable().await?;
        let rows = accounts::transfer_amounts(&mut tx, account_id, btc_amount, usd_amount).await?;
        tx.commit().await?;
        Ok(rows == 1)
    }

    /// Admits a limit order and matches it against the book until it is
    /// fulfilled or no compatible counter-party remains.
    ///
    /// Admission requires the account's live reservations plus the new
    /// order's requirement to fit within its balances. An order failing the
    /// check is still inserted, with state cancelled and no reservations:
    /// the caller gets a stable order id and the user a history record.
    pub async fn create_standing_order(
        &self,
        params: StandingOrderParams,
    ) -> Result<StandingOrderPlacement, EngineError> {
        if params.quantity.as_sats() <= 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if params.limit_price.as_cents() < 0 {
            return Err(EngineError::NegativeLimitPrice);
        }

        let (mut reserved_usd, mut reserved_btc) = match params.kind {
            OrderKind::Buy => (
                params.quantity.to_usd(params.limit_price.to_f64()),
                Btc::from_sats(0),
            ),
            OrderKind::Sell => (Usd::from_cents(0), params.quantity),
        };

        let mut tx = self.database.begin_serializable().await?;

        let account = accounts::get_account_by_id(&mut tx, params.account_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        let reserved = accounts::get_reserved_amounts(&mut tx, params.account_id).await?;

        let sufficient = reserved.usd + reserved_usd <= account.usd_amount
            && reserved.btc + reserved_btc <= account.btc_amount;
        let state = if sufficient {
            OrderState::Live
        } else {
            reserved_usd = Usd::from_cents(0);
            reserved_btc = Btc::from_sats(0);
            OrderState::Cancelled
        };

        let mut order = orders::insert_standing_order(
            &mut tx,
            &orders::NewStandingOrder {
                account_id: params.account_id,
                kind: params.kind,
                state,
                quantity: params.quantity,
                limit_price: params.limit_price,
                reserved_usd_amount: reserved_usd,
                reserved_btc_amount: reserved_btc,
                webhook_url: params.webhook_url,
            },
        )
        .await?;
        let mut affected_order_ids = vec![order.id];

        if order.state == OrderState::Live {
            while order.state != OrderState::Fulfilled {
                match params.kind {
                    OrderKind::Buy => {
                        let mut seller =
                            match orders::get_best_seller(&mut tx, params.limit_price).await? {
                                Some(seller) => seller,
                                None => break,
                            };
                        affected_order_ids.push(seller.id);
                        let quantity = order.quantity.min(seller.quantity);
                        let price = seller.limit_price;
                        settle_deal(&mut tx, &mut seller, &mut order, quantity, price).await?;
                    }
                    OrderKind::Sell => {
                        let mut buyer =
                            match orders::get_best_buyer(&mut tx, params.limit_price).await? {
                                Some(buyer) => buyer,
                                None => break,
                            };
                        affected_order_ids.push(buyer.id);
                        let quantity = order.quantity.min(buyer.quantity);
                        let price = buyer.limit_price;
                        settle_deal(&mut tx, &mut order, &mut buyer, quantity, price).await?;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(StandingOrderPlacement {
            order,
            affected_order_ids,
        })
    }

    /// Executes a market order: consumes the best available liquidity until
    /// the quantity is exhausted, the book runs empty or the account cannot
    /// cover another fill. The order is inserted with limit_price = 0 so
    /// that settlement has its uniform two-sided interface, and deleted
    /// again before commit; it never rests on the book.
    pub async fn execute_market_order(
        &self,
        params: MarketOrderParams,
    ) -> Result<MarketOrderFill, EngineError> {
        if params.quantity.as_sats() <= 0 {
            return Err(EngineError::InvalidQuantity);
        }

        let mut tx = self.database.begin_serializable().await?;

        let mut order = orders::insert_standing_order(
            &mut tx,
            &orders::NewStandingOrder {
                account_id: params.account_id,
                kind: params.kind,
                state: OrderState::Live,
                quantity: params.quantity,
                limit_price: Usd::from_cents(0),
                reserved_usd_amount: Usd::from_cents(0),
                reserved_btc_amount: Btc::from_sats(0),
                webhook_url: None,
            },
        )
        .await?;
        let mut affected_order_ids = Vec::new();

        while order.quantity.as_sats() > 0 {
            // Balances move with every fill, so the spending power is
            // re-read each round.
            let account = accounts::get_account_by_id(&mut tx, params.account_id)
                .await?
                .ok_or(EngineError::NotFound)?;

            match params.kind {
                OrderKind::Buy => {
                    let mut seller = match orders::get_best_market_seller(&mut tx).await? {
                        Some(seller) => seller,
                        None => break,
                    };
                    let price = seller.limit_price;
                    let affordable = max_affordable_quantity(account.usd_amount, price);
                    let quantity = seller.quantity.min(affordable).min(order.quantity);
                    if quantity.as_sats() == 0 {
                        break;
                    }
                    affected_order_ids.push(seller.id);
                    settle_deal(&mut tx, &mut seller, &mut order, quantity, price).await?;
                }
                OrderKind::Sell => {
                    let mut buyer = match orders::get_best_market_buyer(&mut tx).await? {
                        Some(buyer) => buyer,
                        None => break,
                    };
                    let quantity = order
                        .quantity
                        .min(buyer.quantity)
                        .min(account.btc_amount);
                    if quantity.as_sats() == 0 {
                        break;
                    }
                    affected_order_ids.push(buyer.id);
                    let price = buyer.limit_price;
                    settle_deal(&mut tx, &mut order, &mut buyer, quantity, price).await?;
                }
            }
        }

        let fill = MarketOrderFill {
            filled_quantity: order.filled_quantity,
            filled_price: order.filled_price,
            affected_order_ids,
        };
        orders::delete_standing_order(&mut tx, order.id).await?;
        tx.commit().await?;
        Ok(fill)
    }

    /// Deletes an order by owner request, releasing its reservations.
    /// Only live orders are deletable; fulfilled and cancelled orders are
    /// terminal history records. Returns whether a row was deleted.
    pub async fn delete_standing_order(&self, order_id: i64) -> Result<bool, EngineError> {
        let mut tx = self.database.begin_serializable().await?;
        let order = orders::get_standing_order(&mut tx, order_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if order.state != OrderState::Live {
            return Ok(false);
        }
        let rows = orders::delete_standing_order(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(rows == 1)
    }
}

/// The largest quantity the given USD balance can pay for at `price`,
/// rounded down to satoshi precision.
fn max_affordable_quantity(usd_amount: Usd, price: Usd) -> Btc {
    let sats = i128::from(usd_amount.as_cents()) * i128::from(BTC_BASE)
        / i128::from(price.as_cents());
    Btc::from_sats(sats as i64)
}

/// Executes one fill between a seller and a buyer at `btc_price` within the
/// enclosing transaction: moves cash and crypto between the two accounts,
/// advances both orders' fill progress and releases the corresponding share
/// of their reservations. The buyer's reserved USD is released at the
/// buyer's own limit price rather than the deal price, so a fully filled
/// buy always ends with zero reserved USD.
async fn settle_deal(
    conn: &mut PgConnection,
    seller: &mut StandingOrder,
    buyer: &mut StandingOrder,
    quantity: Btc,
    btc_price: Usd,
) -> Result<(), EngineError> {
    let notional = quantity.to_usd(btc_price.to_f64());

    let rows = accounts::transfer_amounts(conn, seller.account_id, -quantity, notional).await?;
    if rows != 1 {
        return Err(EngineError::InvalidTransferFromSeller);
    }
    let rows = accounts::transfer_amounts(conn, buyer.account_id, quantity, -notional).await?;
    if rows != 1 {
        return Err(EngineError::InvalidTransferToBuyer);
    }

    *seller = orders::satisfy_order(
        conn,
        seller.id,
        quantity,
        notional,
        quantity,
        Usd::from_cents(0),
    )
    .await?;

    let reserved_usd_release = quantity.to_usd(buyer.limit_price.to_f64());
    *buyer = orders::satisfy_order(
        conn,
        buyer.id,
        quantity,
        notional,
        Btc::from_sats(0),
        reserved_usd_release,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affordable_quantity_rounds_down() {
        // 100.00 USD at 10000.00 USD per BTC buys exactly 0.01 BTC.
        assert_eq!(
            max_affordable_quantity(Usd::from_cents(100_00), Usd::from_cents(10_000_00)),
            Btc::from_sats(1_000_000)
        );
        // One cent short of affording another satoshi's worth.
        assert_eq!(
            max_affordable_quantity(Usd::from_cents(99_99), Usd::from_cents(10_000_00)),
            Btc::from_sats(999_900)
        );
        // A balance below the price of one satoshi affords nothing.
        assert_eq!(
            max_affordable_quantity(Usd::from_cents(0), Usd::from_cents(10_000_00)),
            Btc::from_sats(0)
        );
    }

    mod postgres {
        use super::*;
        use model::money::BTC_BASE;

        async fn new_exchange() -> Exchange {
            let db = Database::new("postgresql://").unwrap();
            db.create_schema().await.unwrap();
            db.clear().await.unwrap();
            Exchange::new(db)
        }

        fn btc(amount: f64) -> Btc {
            Btc::from_f64(amount)
        }

        fn usd(amount: f64) -> Usd {
            Usd::from_f64(amount)
        }

        async fn total_balances(exchange: &Exchange) -> (Usd, Btc) {
            #[derive(sqlx::FromRow)]
            struct Totals {
                usd_amount: i64,
                btc_amount: i64,
            }
            let mut conn = exchange.database.connection().await.unwrap();
            let totals: Totals = sqlx::query_as(
                "SELECT \
                    COALESCE(SUM(usd_amount), 0)::INT8 AS usd_amount, \
                    COALESCE(SUM(btc_amount), 0)::INT8 AS btc_amount \
                FROM account;",
            )
            .fetch_one(&mut *conn)
            .await
            .unwrap();
            (
                Usd::from_cents(totals.usd_amount),
                Btc::from_sats(totals.btc_amount),
            )
        }

        fn limit_order(
            account_id: i64,
            kind: OrderKind,
            quantity: Btc,
            limit_price: Usd,
        ) -> StandingOrderParams {
            StandingOrderParams {
                account_id,
                kind,
                quantity,
                limit_price,
                webhook_url: None,
            }
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_deposit_roundtrip() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();

            assert!(exchange
                .deposit(account.id, btc(1.0), usd(40_000.0))
                .await
                .unwrap());
            let account = exchange.account_by_id(account.id).await.unwrap().unwrap();
            assert_eq!(account.btc_amount.to_string(), "1.00000000");
            assert_eq!(account.usd_amount.to_string(), "40000.00");
            assert_eq!(account.btc_amount.to_usd(10_000.0).to_string(), "10000.00");

            // Withdrawing more than the balance fails without side effects.
            assert!(!exchange
                .deposit(account.id, btc(-2.0), usd(0.0))
                .await
                .unwrap());
            let account = exchange.account_by_id(account.id).await.unwrap().unwrap();
            assert_eq!(account.btc_amount, btc(1.0));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_register_rejects_duplicate_username() {
            let exchange = new_exchange().await;
            exchange.register_account("a").await.unwrap();
            assert!(matches!(
                exchange.register_account("a").await,
                Err(EngineError::DuplicateUsername)
            ));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_insufficient_reservation_cancels_order() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();
            exchange
                .deposit(account.id, btc(1.0), usd(0.0))
                .await
                .unwrap();

            let placement = exchange
                .create_standing_order(limit_order(
                    account.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Cancelled);
            assert_eq!(placement.order.reserved_btc_amount, Btc::from_sats(0));
            assert_eq!(placement.order.reserved_usd_amount, Usd::from_cents(0));
            assert_eq!(placement.affected_order_ids, vec![placement.order.id]);

            // The balance stays untouched and unreserved.
            let mut conn = exchange.database.connection().await.unwrap();
            let reserved = accounts::get_reserved_amounts(&mut conn, account.id)
                .await
                .unwrap();
            assert_eq!(reserved.btc, Btc::from_sats(0));
            assert_eq!(reserved.usd, Usd::from_cents(0));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_admission_boundaries() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();
            exchange
                .deposit(account.id, btc(10.0), usd(0.0))
                .await
                .unwrap();

            // Reserving the entire balance succeeds.
            let placement = exchange
                .create_standing_order(limit_order(
                    account.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Live);
            assert_eq!(placement.order.reserved_btc_amount, btc(10.0));

            // One satoshi over the (now fully reserved) balance cancels.
            let placement = exchange
                .create_standing_order(limit_order(
                    account.id,
                    OrderKind::Sell,
                    Btc::from_sats(1),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Cancelled);
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_rejects_invalid_parameters() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();

            assert!(matches!(
                exchange
                    .create_standing_order(limit_order(
                        account.id,
                        OrderKind::Buy,
                        btc(0.0),
                        usd(1.0)
                    ))
                    .await,
                Err(EngineError::InvalidQuantity)
            ));
            assert!(matches!(
                exchange
                    .create_standing_order(limit_order(
                        account.id,
                        OrderKind::Buy,
                        btc(1.0),
                        usd(-1.0)
                    ))
                    .await,
                Err(EngineError::NegativeLimitPrice)
            ));
            assert!(matches!(
                exchange
                    .execute_market_order(MarketOrderParams {
                        account_id: account.id,
                        kind: OrderKind::Buy,
                        quantity: btc(-1.0),
                    })
                    .await,
                Err(EngineError::InvalidQuantity)
            ));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_non_crossing_buy_rests_live() {
            let exchange = new_exchange().await;
            let seller = exchange.register_account("seller").await.unwrap();
            let buyer = exchange.register_account("buyer").await.unwrap();
            exchange.deposit(seller.id, btc(1.0), usd(0.0)).await.unwrap();
            exchange
                .deposit(buyer.id, btc(0.0), usd(100_000.0))
                .await
                .unwrap();

            exchange
                .create_standing_order(limit_order(
                    seller.id,
                    OrderKind::Sell,
                    btc(1.0),
                    usd(20_000.0),
                ))
                .await
                .unwrap();

            // The buy limit is below every resting sell: no fills.
            let placement = exchange
                .create_standing_order(limit_order(
                    buyer.id,
                    OrderKind::Buy,
                    btc(1.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Live);
            assert_eq!(placement.order.filled_quantity, Btc::from_sats(0));
            assert_eq!(placement.affected_order_ids, vec![placement.order.id]);
            assert_eq!(placement.order.reserved_usd_amount, usd(10_000.0));
        }

        // The scenario from the end-to-end suite: two resting sells, a
        // market buy sweeping across both, then a sequence of limit buys
        // exercising reservation, cancellation, deletion and a final cross.
        #[tokio::test]
        #[ignore]
        async fn postgres_matching_scenario() {
            let exchange = new_exchange().await;
            let user_a = exchange.register_account("A").await.unwrap();
            let user_b = exchange.register_account("B").await.unwrap();
            let user_c = exchange.register_account("C").await.unwrap();
            let user_d = exchange.register_account("D").await.unwrap();

            assert!(exchange.deposit(user_a.id, btc(1.0), usd(0.0)).await.unwrap());
            assert!(exchange.deposit(user_b.id, btc(10.0), usd(0.0)).await.unwrap());
            assert!(exchange
                .deposit(user_c.id, btc(0.0), usd(250_000.0))
                .await
                .unwrap());
            assert!(exchange
                .deposit(user_d.id, btc(0.0), usd(300_000.0))
                .await
                .unwrap());

            let initial_totals = total_balances(&exchange).await;

            // A cannot cover a 10 BTC sell with 1 BTC.
            let placement = exchange
                .create_standing_order(limit_order(
                    user_a.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Cancelled);
            assert_eq!(placement.affected_order_ids.len(), 1);

            assert!(exchange.deposit(user_a.id, btc(9.0), usd(0.0)).await.unwrap());

            let order1 = exchange
                .create_standing_order(limit_order(
                    user_a.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert_eq!(order1.state, OrderState::Live);

            let order2 = exchange
                .create_standing_order(limit_order(
                    user_b.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(20_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert_eq!(order2.state, OrderState::Live);

            // C sweeps 15 BTC: all of order1 at 10k, then 5 BTC of order2
            // at 20k.
            let fill = exchange
                .execute_market_order(MarketOrderParams {
                    account_id: user_c.id,
                    kind: OrderKind::Buy,
                    quantity: btc(15.0),
                })
                .await
                .unwrap();
            assert_eq!(fill.filled_quantity, btc(15.0));
            assert_eq!(fill.filled_price, usd(200_000.0));
            assert_eq!(fill.affected_order_ids, vec![order1.id, order2.id]);

            let user_c = exchange.account_by_id(user_c.id).await.unwrap().unwrap();
            assert_eq!(user_c.btc_amount, btc(15.0));
            assert_eq!(user_c.usd_amount, usd(50_000.0));

            let order1 = exchange.standing_order(order1.id).await.unwrap().unwrap();
            assert_eq!(order1.state, OrderState::Fulfilled);
            assert_eq!(order1.quantity, Btc::from_sats(0));
            assert_eq!(order1.filled_quantity, btc(10.0));
            assert_eq!(order1.filled_price, usd(100_000.0));
            assert_eq!(order1.reserved_btc_amount, Btc::from_sats(0));

            let order2 = exchange.standing_order(order2.id).await.unwrap().unwrap();
            assert_eq!(order2.state, OrderState::Live);
            assert_eq!(order2.quantity, btc(5.0));
            assert_eq!(order2.filled_quantity, btc(5.0));
            assert_eq!(order2.filled_price, usd(100_000.0));
            assert_eq!(order2.reserved_btc_amount, btc(5.0));

            // The market order row is gone.
            let mut conn = exchange.database.connection().await.unwrap();
            let all_orders: Vec<StandingOrder> = orders::get_standing_orders(
                &mut conn,
                &(1..=10).collect::<Vec<i64>>(),
            )
            .await
            .unwrap();
            assert_eq!(all_orders.len(), 3);
            drop(conn);

            // Matching conserves totals; only deposits change them.
            assert_eq!(total_balances(&exchange).await, initial_totals);

            // D bids below the remaining best sell: rests live, fully
            // reserved.
            let order3 = exchange
                .create_standing_order(limit_order(
                    user_d.id,
                    OrderKind::Buy,
                    btc(20.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert_eq!(order3.state, OrderState::Live);
            assert_eq!(order3.filled_quantity, Btc::from_sats(0));
            assert_eq!(order3.reserved_usd_amount, usd(200_000.0));

            // Another buy needing 250k exceeds D's free 100k: cancelled.
            let order4 = exchange
                .create_standing_order(limit_order(
                    user_d.id,
                    OrderKind::Buy,
                    btc(10.0),
                    usd(25_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert_eq!(order4.state, OrderState::Cancelled);

            // Deleting the resting buy releases its reservation...
            assert!(exchange.delete_standing_order(order3.id).await.unwrap());
            assert!(matches!(
                exchange.standing_order(order3.id).await,
                Ok(None)
            ));

            // ...so the same buy is admitted now and crosses B's remaining
            // 5 BTC at 20k.
            let placement = exchange
                .create_standing_order(limit_order(
                    user_d.id,
                    OrderKind::Buy,
                    btc(10.0),
                    usd(25_000.0),
                ))
                .await
                .unwrap();
            let order5 = placement.order;
            assert_eq!(placement.affected_order_ids, vec![order5.id, order2.id]);
            assert_eq!(order5.state, OrderState::Live);
            assert_eq!(order5.quantity, btc(5.0));
            assert_eq!(order5.filled_quantity, btc(5.0));
            assert_eq!(order5.filled_price, usd(100_000.0));
            // Reservation still covers the remaining 5 BTC at the limit.
            assert_eq!(order5.reserved_usd_amount, usd(125_000.0));

            let order2 = exchange.standing_order(order2.id).await.unwrap().unwrap();
            assert_eq!(order2.state, OrderState::Fulfilled);
            assert_eq!(order2.quantity, Btc::from_sats(0));
            assert_eq!(order2.reserved_btc_amount, Btc::from_sats(0));

            assert_eq!(total_balances(&exchange).await, initial_totals);
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_market_buy_stops_at_spending_power() {
            let exchange = new_exchange().await;
            let seller = exchange.register_account("seller").await.unwrap();
            let buyer = exchange.register_account("buyer").await.unwrap();
            exchange
                .deposit(seller.id, btc(10.0), usd(0.0))
                .await
                .unwrap();
            exchange
                .deposit(buyer.id, btc(0.0), usd(5_000.0))
                .await
                .unwrap();

            exchange
                .create_standing_order(limit_order(
                    seller.id,
                    OrderKind::Sell,
                    btc(10.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();

            // 5000 USD at 10000 USD/BTC affords exactly half a coin.
            let fill = exchange
                .execute_market_order(MarketOrderParams {
                    account_id: buyer.id,
                    kind: OrderKind::Buy,
                    quantity: btc(2.0),
                })
                .await
                .unwrap();
            assert_eq!(fill.filled_quantity, btc(0.5));
            assert_eq!(fill.filled_price, usd(5_000.0));

            let buyer = exchange.account_by_id(buyer.id).await.unwrap().unwrap();
            assert_eq!(buyer.usd_amount, Usd::from_cents(0));
            assert_eq!(buyer.btc_amount, btc(0.5));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_market_sell_stops_at_btc_balance() {
            let exchange = new_exchange().await;
            let seller = exchange.register_account("seller").await.unwrap();
            let buyer = exchange.register_account("buyer").await.unwrap();
            exchange.deposit(seller.id, btc(1.0), usd(0.0)).await.unwrap();
            exchange
                .deposit(buyer.id, btc(0.0), usd(100_000.0))
                .await
                .unwrap();

            exchange
                .create_standing_order(limit_order(
                    buyer.id,
                    OrderKind::Buy,
                    btc(5.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();

            // The seller asks for 3 BTC but only holds 1.
            let fill = exchange
                .execute_market_order(MarketOrderParams {
                    account_id: seller.id,
                    kind: OrderKind::Sell,
                    quantity: btc(3.0),
                })
                .await
                .unwrap();
            assert_eq!(fill.filled_quantity, btc(1.0));
            assert_eq!(fill.filled_price, usd(10_000.0));

            let seller = exchange.account_by_id(seller.id).await.unwrap().unwrap();
            assert_eq!(seller.btc_amount, Btc::from_sats(0));
            assert_eq!(seller.usd_amount, usd(10_000.0));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_market_order_on_empty_book_fills_nothing() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();
            exchange
                .deposit(account.id, btc(0.0), usd(1_000.0))
                .await
                .unwrap();

            let fill = exchange
                .execute_market_order(MarketOrderParams {
                    account_id: account.id,
                    kind: OrderKind::Buy,
                    quantity: btc(1.0),
                })
                .await
                .unwrap();
            assert_eq!(fill.filled_quantity, Btc::from_sats(0));
            assert_eq!(fill.filled_price, Usd::from_cents(0));
            assert!(fill.affected_order_ids.is_empty());
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_ties_go_to_earliest_order() {
            let exchange = new_exchange().await;
            let first = exchange.register_account("first").await.unwrap();
            let second = exchange.register_account("second").await.unwrap();
            let buyer = exchange.register_account("buyer").await.unwrap();
            exchange.deposit(first.id, btc(1.0), usd(0.0)).await.unwrap();
            exchange.deposit(second.id, btc(1.0), usd(0.0)).await.unwrap();
            exchange
                .deposit(buyer.id, btc(0.0), usd(10_000.0))
                .await
                .unwrap();

            let first_sell = exchange
                .create_standing_order(limit_order(
                    first.id,
                    OrderKind::Sell,
                    btc(1.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap()
                .order;
            let second_sell = exchange
                .create_standing_order(limit_order(
                    second.id,
                    OrderKind::Sell,
                    btc(1.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert!(first_sell.id < second_sell.id);

            let placement = exchange
                .create_standing_order(limit_order(
                    buyer.id,
                    OrderKind::Buy,
                    btc(1.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Fulfilled);
            assert_eq!(
                placement.affected_order_ids,
                vec![placement.order.id, first_sell.id]
            );

            let first_sell = exchange
                .standing_order(first_sell.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(first_sell.state, OrderState::Fulfilled);
            let second_sell = exchange
                .standing_order(second_sell.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(second_sell.state, OrderState::Live);
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_delete_only_live_orders() {
            let exchange = new_exchange().await;
            let account = exchange.register_account("a").await.unwrap();

            let cancelled = exchange
                .create_standing_order(limit_order(
                    account.id,
                    OrderKind::Sell,
                    btc(1.0),
                    usd(10_000.0),
                ))
                .await
                .unwrap()
                .order;
            assert_eq!(cancelled.state, OrderState::Cancelled);

            assert!(!exchange.delete_standing_order(cancelled.id).await.unwrap());
            assert!(exchange
                .standing_order(cancelled.id)
                .await
                .unwrap()
                .is_some());
            assert!(matches!(
                exchange.delete_standing_order(cancelled.id + 1000).await,
                Err(EngineError::NotFound)
            ));
        }

        #[tokio::test]
        #[ignore]
        async fn postgres_fills_conserve_every_base_unit() {
            let exchange = new_exchange().await;
            let seller = exchange.register_account("seller").await.unwrap();
            let buyer = exchange.register_account("buyer").await.unwrap();
            exchange.deposit(seller.id, btc(1.0), usd(0.0)).await.unwrap();
            exchange
                .deposit(buyer.id, btc(0.0), usd(20_000.0))
                .await
                .unwrap();
            let initial_totals = total_balances(&exchange).await;

            // An odd quantity at an odd price exercises the conversion
            // rounding.
            exchange
                .create_standing_order(limit_order(
                    seller.id,
                    OrderKind::Sell,
                    Btc::from_sats(33_333_333),
                    usd(10_001.01),
                ))
                .await
                .unwrap();
            let placement = exchange
                .create_standing_order(limit_order(
                    buyer.id,
                    OrderKind::Buy,
                    Btc::from_sats(33_333_333),
                    usd(10_002.0),
                ))
                .await
                .unwrap();
            assert_eq!(placement.order.state, OrderState::Fulfilled);

            assert_eq!(total_balances(&exchange).await, initial_totals);

            let seller = exchange.account_by_id(seller.id).await.unwrap().unwrap();
            let buyer = exchange.account_by_id(buyer.id).await.unwrap().unwrap();
            // The deal executed at the resting sell's price.
            let notional = Btc::from_sats(33_333_333).to_usd(10_001.01);
            assert_eq!(seller.usd_amount, notional);
            assert_eq!(buyer.usd_amount, usd(20_000.0) - notional);
            assert_eq!(
                seller.btc_amount,
                Btc::from_sats(BTC_BASE - 33_333_333)
            );
            assert_eq!(buyer.btc_amount, Btc::from_sats(33_333_333));
        }
    }
}
