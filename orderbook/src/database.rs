pub mod accounts;
pub mod orders;

use anyhow::Result;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, PgPool, Postgres, Transaction};

// The schema is created statement by statement because sqlx prepares each
// query individually. The enum types have no IF NOT EXISTS form, hence the
// DO blocks.
const SCHEMA: &[&str] = &[
    "DO $$ BEGIN \
        CREATE TYPE order_kind AS ENUM ('buy', 'sell'); \
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
    "DO $$ BEGIN \
        CREATE TYPE order_state AS ENUM ('live', 'fulfilled', 'cancelled'); \
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
    "CREATE TABLE IF NOT EXISTS account (\
        id BIGSERIAL PRIMARY KEY, \
        username TEXT NOT NULL UNIQUE, \
        token TEXT NOT NULL UNIQUE, \
        usd_amount INT8 NOT NULL DEFAULT 0 CHECK (usd_amount >= 0), \
        btc_amount INT8 NOT NULL DEFAULT 0 CHECK (btc_amount >= 0)\
    );",
    "CREATE TABLE IF NOT EXISTS standing_order (\
        id BIGSERIAL PRIMARY KEY, \
        account_id INT8 NOT NULL REFERENCES account (id), \
        type order_kind NOT NULL, \
        state order_state NOT NULL, \
        quantity INT8 NOT NULL, \
        filled_quantity INT8 NOT NULL DEFAULT 0, \
        filled_price INT8 NOT NULL DEFAULT 0, \
        limit_price INT8 NOT NULL, \
        reserved_usd_amount INT8 NOT NULL DEFAULT 0, \
        reserved_btc_amount INT8 NOT NULL DEFAULT 0, \
        webhook_url TEXT\
    );",
    "CREATE INDEX IF NOT EXISTS standing_order_match_idx \
        ON standing_order (state, type, limit_price, id);",
];

// The pool uses an Arc internally.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

// The query set lives in the submodules as free functions over
// `&mut PgConnection` so that the same queries compose inside a transaction
// and against a plain pool connection.

impl Database {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self {
            pool: PgPool::connect_lazy(uri)?,
        })
    }

    /// Creates the schema if it does not exist yet. Run once at startup.
    pub async fn create_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            self.pool.execute(*statement).await?;
        }
        Ok(())
    }

    /// Begins the transaction every engine call runs in. Serializable
    /// isolation is mandatory: admission reads balances and aggregate
    /// reservations before writing, and settlement reads order rows before
    /// mutating them. The database reports conflicting interleavings as
    /// serialization failures instead of letting them commit.
    pub async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut transaction)
            .await?;
        Ok(transaction)
    }

    /// A single connection for plain reads outside any engine transaction.
    pub async fn connection(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        self.pool.acquire().await
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delete all data in the database. Only used by tests.
    pub async fn clear(&self) -> Result<()> {
        self.pool
            .execute(sqlx::query(
                "TRUNCATE account, standing_order RESTART IDENTITY CASCADE;",
            ))
            .await?;
        Ok(())
    }
}
