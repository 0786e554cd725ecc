use model::money::{Btc, Usd};
use model::Account;
use sqlx::PgConnection;

const ACCOUNT_COLUMNS: &str = "id, username, token, usd_amount, btc_amount";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    token: String,
    usd_amount: i64,
    btc_amount: i64,
}

impl AccountRow {
    fn into_account(self) -> Account {
        Account {
            id: self.id,
            username: self.username,
            token: self.token,
            usd_amount: Usd::from_cents(self.usd_amount),
            btc_amount: Btc::from_sats(self.btc_amount),
        }
    }
}

pub async fn create_account(
    conn: &mut PgConnection,
    username: &str,
    token: &str,
) -> Result<Account, sqlx::Error> {
    const QUERY: &str = const_format::concatcp!(
        "INSERT INTO account (username, token) VALUES ($1, $2) RETURNING ",
        ACCOUNT_COLUMNS,
        ";"
    );
    let row: AccountRow = sqlx::query_as(QUERY)
        .bind(username)
        .bind(token)
        .fetch_one(conn)
        .await?;
    Ok(row.into_account())
}

pub async fn get_account_by_id(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    const QUERY: &str = const_format::concatcp!(
        "SELECT ",
        ACCOUNT_COLUMNS,
        " FROM account WHERE id = $1;"
    );
    let row: Option<AccountRow> = sqlx::query_as(QUERY).bind(id).fetch_optional(conn).await?;
    Ok(row.map(AccountRow::into_account))
}

pub async fn get_account_by_token(
    conn: &mut PgConnection,
    token: &str,
) -> Result<Option<Account>, sqlx::Error> {
    const QUERY: &str = const_format::concatcp!(
        "SELECT ",
        ACCOUNT_COLUMNS,
        " FROM account WHERE token = $1;"
    );
    let row: Option<AccountRow> = sqlx::query_as(QUERY)
        .bind(token)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(AccountRow::into_account))
}

/// Applies the signed deltas to the account's balances. The update succeeds
/// only if both resulting balances stay non negative; the returned count is
/// 0 when the guard rejects or the account does not exist and 1 otherwise.
pub async fn transfer_amounts(
    conn: &mut PgConnection,
    id: i64,
    btc_delta: Btc,
    usd_delta: Usd,
) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "\
        UPDATE account \
        SET btc_amount = btc_amount + $2, usd_amount = usd_amount + $3 \
        WHERE id = $1 \
          AND btc_amount + $2 >= 0 \
          AND usd_amount + $3 >= 0;";
    let result = sqlx::query(QUERY)
        .bind(id)
        .bind(btc_delta.as_sats())
        .bind(usd_delta.as_cents())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReservedAmounts {
    pub usd: Usd,
    pub btc: Btc,
}

/// Sums the reservations of the account's live orders. SUM over int8 yields
/// numeric in Postgres, hence the casts.
pub async fn get_reserved_amounts(
    conn: &mut PgConnection,
    account_id: i64,
) -> Result<ReservedAmounts, sqlx::Error> {
    const QUERY: &str = "\
        SELECT \
            COALESCE(SUM(reserved_usd_amount), 0)::INT8 AS usd_amount, \
            COALESCE(SUM(reserved_btc_amount), 0)::INT8 AS btc_amount \
        FROM standing_order \
        WHERE account_id = $1 AND state = 'live';";

    #[derive(sqlx::FromRow)]
    struct ReservedRow {
        usd_amount: i64,
        btc_amount: i64,
    }

    let row: ReservedRow = sqlx::query_as(QUERY).bind(account_id).fetch_one(conn).await?;
    Ok(ReservedAmounts {
        usd: Usd::from_cents(row.usd_amount),
        btc: Btc::from_sats(row.btc_amount),
    })
}
