//! Schema bootstrap.
//!
//! The DDL below is the portable subset both backends accept, so startup can
//! run it verbatim against SQLite or Postgres through the `Any` driver.
//! `ensure_schema` is idempotent and safe to run on every boot.

use crate::DbPool;

const CREATE_DAILY_DATA: &str = "CREATE TABLE IF NOT EXISTS daily_data (
    date TEXT PRIMARY KEY,
    demand DOUBLE PRECISION NOT NULL DEFAULT 0,
    production_plan DOUBLE PRECISION NOT NULL DEFAULT 0,
    inventory DOUBLE PRECISION NOT NULL DEFAULT 0,
    forecast DOUBLE PRECISION
)";

const CREATE_CONVERSATION_HISTORY: &str = "CREATE TABLE IF NOT EXISTS conversation_history (
    session_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, seq)
)";

pub async fn ensure_schema(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_DAILY_DATA).execute(pool).await?;
    sqlx::query(CREATE_CONVERSATION_HISTORY).execute(pool).await?;
    Ok(())
}
