use const_format::concatcp;
use model::money::{Btc, Usd};
use model::{OrderKind, OrderState, StandingOrder};
use sqlx::PgConnection;

#[derive(sqlx::Type)]
#[sqlx(type_name = "order_kind", rename_all = "lowercase")]
pub enum DbOrderKind {
    Buy,
    Sell,
}

impl DbOrderKind {
    pub fn from(kind: OrderKind) -> Self {
        match kind {
            OrderKind::Buy => Self::Buy,
            OrderKind::Sell => Self::Sell,
        }
    }

    fn into(self) -> OrderKind {
        match self {
            Self::Buy => OrderKind::Buy,
            Self::Sell => OrderKind::Sell,
        }
    }
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "order_state", rename_all = "lowercase")]
pub enum DbOrderState {
    Live,
    Fulfilled,
    Cancelled,
}

impl DbOrderState {
    pub fn from(state: OrderState) -> Self {
        match state {
            OrderState::Live => Self::Live,
            OrderState::Fulfilled => Self::Fulfilled,
            OrderState::Cancelled => Self::Cancelled,
        }
    }

    fn into(self) -> OrderState {
        match self {
            Self::Live => OrderState::Live,
            Self::Fulfilled => OrderState::Fulfilled,
            Self::Cancelled => OrderState::Cancelled,
        }
    }
}

const ORDER_COLUMNS: &str = "id, account_id, type, state, quantity, filled_quantity, \
     filled_price, limit_price, reserved_usd_amount, reserved_btc_amount, webhook_url";

const SELECT_ORDER: &str = concatcp!("SELECT ", ORDER_COLUMNS, " FROM standing_order");

#[derive(sqlx::FromRow)]
struct StandingOrderRow {
    id: i64,
    account_id: i64,
    #[sqlx(rename = "type")]
    kind: DbOrderKind,
    state: DbOrderState,
    quantity: i64,
    filled_quantity: i64,
    filled_price: i64,
    limit_price: i64,
    reserved_usd_amount: i64,
    reserved_btc_amount: i64,
    webhook_url: Option<String>,
}

impl StandingOrderRow {
    fn into_order(self) -> StandingOrder {
        StandingOrder {
            id: self.id,
            account_id: self.account_id,
            kind: self.kind.into(),
            state: self.state.into(),
            quantity: Btc::from_sats(self.quantity),
            filled_quantity: Btc::from_sats(self.filled_quantity),
            filled_price: Usd::from_cents(self.filled_price),
            limit_price: Usd::from_cents(self.limit_price),
            reserved_usd_amount: Usd::from_cents(self.reserved_usd_amount),
            reserved_btc_amount: Btc::from_sats(self.reserved_btc_amount),
            webhook_url: self.webhook_url,
        }
    }
}

pub struct NewStandingOrder {
    pub account_id: i64,
    pub kind: OrderKind,
    pub state: OrderState,
    pub quantity: Btc,
    pub limit_price: Usd,
    pub reserved_usd_amount: Usd,
    pub reserved_btc_amount: Btc,
    pub webhook_url: Option<String>,
}

pub async fn insert_standing_order(
    conn: &mut PgConnection,
    order: &NewStandingOrder,
) -> Result<StandingOrder, sqlx::Error> {
    const QUERY: &str = concatcp!(
        "INSERT INTO standing_order (\
            account_id, type, state, quantity, limit_price, \
            reserved_usd_amount, reserved_btc_amount, webhook_url) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
        RETURNING ",
        ORDER_COLUMNS,
        ";"
    );
    let row: StandingOrderRow = sqlx::query_as(QUERY)
        .bind(order.account_id)
        .bind(DbOrderKind::from(order.kind))
        .bind(DbOrderState::from(order.state))
        .bind(order.quantity.as_sats())
        .bind(order.limit_price.as_cents())
        .bind(order.reserved_usd_amount.as_cents())
        .bind(order.reserved_btc_amount.as_sats())
        .bind(order.webhook_url.as_deref())
        .fetch_one(conn)
        .await?;
    Ok(row.into_order())
}

pub async fn get_standing_order(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(SELECT_ORDER, " WHERE id = $1;");
    let row: Option<StandingOrderRow> =
        sqlx::query_as(QUERY).bind(id).fetch_optional(conn).await?;
    Ok(row.map(StandingOrderRow::into_order))
}

pub async fn get_standing_orders(
    conn: &mut PgConnection,
    ids: &[i64],
) -> Result<Vec<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(SELECT_ORDER, " WHERE id = ANY($1) ORDER BY id;");
    let rows: Vec<StandingOrderRow> = sqlx::query_as(QUERY)
        .bind(ids.to_vec())
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(StandingOrderRow::into_order).collect())
}

pub async fn delete_standing_order(conn: &mut PgConnection, id: i64) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "DELETE FROM standing_order WHERE id = $1;";
    let result = sqlx::query(QUERY).bind(id).execute(conn).await?;
    Ok(result.rows_affected())
}

// The best-match lookups below power the matching loops. They only consider
// live orders with a positive limit price: market orders are inserted with
// limit_price = 0 and must never surface as counter-parties. Ties at the
// same price go to the earliest order id.

pub async fn get_best_seller(
    conn: &mut PgConnection,
    max_limit_price: Usd,
) -> Result<Option<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(
        SELECT_ORDER,
        " WHERE type = 'sell' AND state = 'live' \
            AND limit_price > 0 AND limit_price <= $1 \
        ORDER BY limit_price ASC, id ASC \
        LIMIT 1;"
    );
    let row: Option<StandingOrderRow> = sqlx::query_as(QUERY)
        .bind(max_limit_price.as_cents())
        .fetch_optional(conn)
        .await?;
    Ok(row.map(StandingOrderRow::into_order))
}

pub async fn get_best_buyer(
    conn: &mut PgConnection,
    min_limit_price: Usd,
) -> Result<Option<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(
        SELECT_ORDER,
        " WHERE type = 'buy' AND state = 'live' \
            AND limit_price > 0 AND limit_price >= $1 \
        ORDER BY limit_price DESC, id ASC \
        LIMIT 1;"
    );
    let row: Option<StandingOrderRow> = sqlx::query_as(QUERY)
        .bind(min_limit_price.as_cents())
        .fetch_optional(conn)
        .await?;
    Ok(row.map(StandingOrderRow::into_order))
}

pub async fn get_best_market_seller(
    conn: &mut PgConnection,
) -> Result<Option<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(
        SELECT_ORDER,
        " WHERE type = 'sell' AND state = 'live' AND limit_price > 0 \
        ORDER BY limit_price ASC, id ASC \
        LIMIT 1;"
    );
    let row: Option<StandingOrderRow> = sqlx::query_as(QUERY).fetch_optional(conn).await?;
    Ok(row.map(StandingOrderRow::into_order))
}

pub async fn get_best_market_buyer(
    conn: &mut PgConnection,
) -> Result<Option<StandingOrder>, sqlx::Error> {
    const QUERY: &str = concatcp!(
        SELECT_ORDER,
        " WHERE type = 'buy' AND state = 'live' AND limit_price > 0 \
        ORDER BY limit_price DESC, id ASC \
        LIMIT 1;"
    );
    let row: Option<StandingOrderRow> = sqlx::query_as(QUERY).fetch_optional(conn).await?;
    Ok(row.map(StandingOrderRow::into_order))
}

/// Applies one fill to the order: moves `quantity` from remaining to filled,
/// adds the fill's USD notional to the filled price total and releases the
/// given share of the reservations. The state flips to fulfilled exactly
/// when the remaining quantity reaches zero, which keeps the order out of
/// all best-match lookups from then on.
pub async fn satisfy_order(
    conn: &mut PgConnection,
    id: i64,
    quantity: Btc,
    filled_price_delta: Usd,
    reserved_btc_delta: Btc,
    reserved_usd_delta: Usd,
) -> Result<StandingOrder, sqlx::Error> {
    const QUERY: &str = concatcp!(
        "UPDATE standing_order \
        SET quantity = quantity - $2, \
            filled_quantity = filled_quantity + $2, \
            filled_price = filled_price + $3, \
            reserved_btc_amount = reserved_btc_amount - $4, \
            reserved_usd_amount = reserved_usd_amount - $5, \
            state = CASE WHEN quantity - $2 = 0 THEN 'fulfilled'::order_state ELSE state END \
        WHERE id = $1 \
        RETURNING ",
        ORDER_COLUMNS,
        ";"
    );
    let row: StandingOrderRow = sqlx::query_as(QUERY)
        .bind(id)
        .bind(quantity.as_sats())
        .bind(filled_price_delta.as_cents())
        .bind(reserved_btc_delta.as_sats())
        .bind(reserved_usd_delta.as_cents())
        .fetch_one(conn)
        .await?;
    Ok(row.into_order())
}
