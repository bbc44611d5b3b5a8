use sqlx::any::AnyRow;
use sqlx::Row;

use stocky_core::calendar::DayKey;
use stocky_core::domain::record::{
    DailyRecord, InventorySummary, QuantitySummary, RecordPatch,
};
use stocky_core::ledger;

use super::{RecordStore, StorageError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "date, demand, production_plan, inventory, forecast";

const UPSERT_DAY: &str = "INSERT INTO daily_data (date, demand, production_plan, inventory, forecast)
     VALUES ($1, $2, $3, $4, $5)
     ON CONFLICT(date) DO UPDATE SET
        demand = excluded.demand,
        production_plan = excluded.production_plan,
        inventory = excluded.inventory,
        forecast = excluded.forecast";

pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlRecordStore {
    async fn fetch_day(&self, date: DayKey) -> Result<Option<DailyRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_data WHERE date = $1"
        ))
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn fetch_all(&self) -> Result<Vec<DailyRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_data ORDER BY date ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn apply_patch(
        &self,
        date: DayKey,
        patch: RecordPatch,
    ) -> Result<DailyRecord, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_data WHERE date = $1"
        ))
        .bind(date.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .map(record_from_row)
        .transpose()?;

        let mut record = existing.unwrap_or_else(|| DailyRecord::new(date));
        patch.apply(&mut record);
        upsert_day(&mut tx, &record).await?;

        if patch.touches_balance() {
            rebalance_from(&mut tx, date).await?;
        }

        let stored = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_data WHERE date = $1"
        ))
        .bind(date.to_string())
        .fetch_one(&mut *tx)
        .await?;
        let stored = record_from_row(stored)?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn store_days(&self, rows: Vec<DailyRecord>) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut earliest = rows[0].date;
        for row in &rows {
            earliest = earliest.min(row.date);
            upsert_day(&mut tx, row).await?;
        }
        rebalance_from(&mut tx, earliest).await?;
        tx.commit().await?;

        Ok(rows.len() as u64)
    }

    async fn demand_summary(&self) -> Result<Option<QuantitySummary>, StorageError> {
        quantity_summary(&self.pool, "demand").await
    }

    async fn production_summary(&self) -> Result<Option<QuantitySummary>, StorageError> {
        quantity_summary(&self.pool, "production_plan").await
    }

    async fn inventory_summary(&self) -> Result<Option<InventorySummary>, StorageError> {
        let row = sqlx::query(
            "SELECT AVG(inventory) AS average, MAX(inventory) AS maximum,
                    MIN(inventory) AS minimum
             FROM daily_data",
        )
        .fetch_one(&self.pool)
        .await?;

        match row.try_get::<Option<f64>, _>("average")? {
            None => Ok(None),
            Some(average) => Ok(Some(InventorySummary {
                average,
                maximum: require_aggregate(&row, "maximum")?,
                minimum: require_aggregate(&row, "minimum")?,
            })),
        }
    }

    async fn stockout_days(&self) -> Result<Vec<DailyRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM daily_data WHERE inventory <= 0 ORDER BY date ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn shift_demand(&self, offset: f64) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query("UPDATE daily_data SET demand = demand + $1")
            .bind(offset)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if changed > 0 {
            let first: Option<String> = sqlx::query_scalar("SELECT MIN(date) FROM daily_data")
                .fetch_one(&mut *tx)
                .await?;
            if let Some(first) = first {
                rebalance_from(&mut tx, parse_day("date", &first)?).await?;
            }
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn write_forecasts(&self, values: &[(DayKey, f64)]) -> Result<u64, StorageError> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut earliest = values[0].0;
        for (date, value) in values {
            earliest = earliest.min(*date);
            sqlx::query(
                "INSERT INTO daily_data (date, demand, production_plan, inventory, forecast)
                 VALUES ($1, 0, 0, 0, $2)
                 ON CONFLICT(date) DO UPDATE SET forecast = excluded.forecast",
            )
            .bind(date.to_string())
            .bind(*value)
            .execute(&mut *tx)
            .await?;
        }
        rebalance_from(&mut tx, earliest).await?;
        tx.commit().await?;

        Ok(values.len() as u64)
    }

    async fn clear_forecasts(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE daily_data SET forecast = NULL WHERE forecast IS NOT NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM daily_data").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

async fn upsert_day(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    record: &DailyRecord,
) -> Result<(), StorageError> {
    sqlx::query(UPSERT_DAY)
        .bind(record.date.to_string())
        .bind(record.demand)
        .bind(record.production)
        .bind(record.inventory)
        .bind(record.forecast)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Reloads every day at or after `from`, replays the running balance seeded
/// from the last day strictly before it, and writes back only the days whose
/// stored inventory drifted. Runs inside the caller's transaction.
async fn rebalance_from(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    from: DayKey,
) -> Result<(), StorageError> {
    let opening: Option<f64> = sqlx::query_scalar(
        "SELECT inventory FROM daily_data WHERE date < $1 ORDER BY date DESC LIMIT 1",
    )
    .bind(from.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM daily_data WHERE date >= $1 ORDER BY date ASC"
    ))
    .bind(from.to_string())
    .fetch_all(&mut **tx)
    .await?;

    let mut records =
        rows.into_iter().map(record_from_row).collect::<Result<Vec<_>, StorageError>>()?;
    let before = records.iter().map(|record| record.inventory).collect::<Vec<_>>();
    ledger::replay_balances(opening.unwrap_or(0.0), &mut records);

    for (record, previous) in records.iter().zip(before) {
        if record.inventory != previous {
            sqlx::query("UPDATE daily_data SET inventory = $1 WHERE date = $2")
                .bind(record.inventory)
                .bind(record.date.to_string())
                .execute(&mut **tx)
                .await?;
        }
    }

    Ok(())
}

async fn quantity_summary(
    pool: &DbPool,
    column: &str,
) -> Result<Option<QuantitySummary>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT AVG({column}) AS average, MAX({column}) AS maximum,
                MIN({column}) AS minimum, SUM({column}) AS total
         FROM daily_data"
    ))
    .fetch_one(pool)
    .await?;

    match row.try_get::<Option<f64>, _>("average")? {
        None => Ok(None),
        Some(average) => Ok(Some(QuantitySummary {
            average,
            maximum: require_aggregate(&row, "maximum")?,
            minimum: require_aggregate(&row, "minimum")?,
            total: require_aggregate(&row, "total")?,
        })),
    }
}

fn record_from_row(row: AnyRow) -> Result<DailyRecord, StorageError> {
    let raw_date = row.try_get::<String, _>("date")?;
    Ok(DailyRecord {
        date: parse_day("date", &raw_date)?,
        demand: row.try_get("demand")?,
        production: row.try_get("production_plan")?,
        inventory: row.try_get("inventory")?,
        forecast: row.try_get("forecast")?,
    })
}

fn parse_day(column: &str, value: &str) -> Result<DayKey, StorageError> {
    DayKey::parse_iso(value).map_err(|error| {
        StorageError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn require_aggregate(row: &AnyRow, column: &str) -> Result<f64, StorageError> {
    row.try_get::<Option<f64>, _>(column)?.ok_or_else(|| {
        StorageError::Decode(format!("aggregate `{column}` missing for non-empty table"))
    })
}

#[cfg(test)]
mod tests {
    use stocky_core::calendar::DayKey;
    use stocky_core::domain::record::{DailyRecord, RecordPatch};
    use stocky_core::ledger;

    use super::SqlRecordStore;
    use crate::repositories::RecordStore;
    use crate::{connect_with_settings, schema, DbPool};

    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        schema::ensure_schema(&pool).await.expect("ensure schema");
        pool
    }

    fn day(value: &str) -> DayKey {
        DayKey::parse_iso(value).expect("valid test date")
    }

    fn seeded(date: &str, demand: f64, production: f64) -> DailyRecord {
        let mut record = DailyRecord::new(day(date));
        record.demand = demand;
        record.production = production;
        record
    }

    #[tokio::test]
    async fn patch_creates_missing_day_and_derives_balance() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());

        let stored = store
            .apply_patch(day("2024-07-10"), RecordPatch::demand(500.0))
            .await
            .expect("apply patch");

        assert_eq!(stored.demand, 500.0);
        assert_eq!(stored.production, 0.0);
        assert_eq!(stored.inventory, -500.0);
        pool.close().await;
    }

    #[tokio::test]
    async fn patch_rebalances_later_days_only() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store
            .store_days(vec![
                seeded("2024-07-01", 100.0, 120.0),
                seeded("2024-07-02", 110.0, 100.0),
                seeded("2024-07-03", 90.0, 100.0),
            ])
            .await
            .expect("seed days");

        store
            .apply_patch(day("2024-07-02"), RecordPatch::production(160.0))
            .await
            .expect("apply patch");

        let records = store.fetch_all().await.expect("fetch all");
        assert_eq!(records[0].inventory, 20.0);
        assert_eq!(records[1].inventory, 70.0);
        assert_eq!(records[2].inventory, 80.0);
        assert!(ledger::holds(0.0, &records));
        pool.close().await;
    }

    #[tokio::test]
    async fn forecast_patch_leaves_balances_alone() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store.store_days(vec![seeded("2024-07-01", 100.0, 120.0)]).await.expect("seed");

        let stored = store
            .apply_patch(day("2024-07-01"), RecordPatch::forecast(Some(104.5)))
            .await
            .expect("apply patch");

        assert_eq!(stored.forecast, Some(104.5));
        assert_eq!(stored.inventory, 20.0);
        pool.close().await;
    }

    #[tokio::test]
    async fn summaries_are_none_for_empty_store() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());

        assert!(store.demand_summary().await.expect("demand summary").is_none());
        assert!(store.production_summary().await.expect("production summary").is_none());
        assert!(store.inventory_summary().await.expect("inventory summary").is_none());
        pool.close().await;
    }

    #[tokio::test]
    async fn summaries_aggregate_over_all_days() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store
            .store_days(vec![
                seeded("2024-07-01", 100.0, 150.0),
                seeded("2024-07-02", 140.0, 100.0),
            ])
            .await
            .expect("seed days");

        let demand = store.demand_summary().await.expect("demand summary").expect("present");
        assert_eq!(demand.average, 120.0);
        assert_eq!(demand.maximum, 140.0);
        assert_eq!(demand.minimum, 100.0);
        assert_eq!(demand.total, 240.0);

        let inventory =
            store.inventory_summary().await.expect("inventory summary").expect("present");
        assert_eq!(inventory.maximum, 50.0);
        assert_eq!(inventory.minimum, 10.0);
        assert_eq!(inventory.average, 30.0);
        pool.close().await;
    }

    #[tokio::test]
    async fn stockouts_are_zero_or_negative_balance_days() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store
            .store_days(vec![
                seeded("2024-07-01", 100.0, 150.0),
                seeded("2024-07-02", 150.0, 100.0),
                seeded("2024-07-03", 80.0, 100.0),
                seeded("2024-07-04", 130.0, 100.0),
            ])
            .await
            .expect("seed days");

        let stockouts = store.stockout_days().await.expect("stockouts");
        let dates: Vec<String> =
            stockouts.iter().map(|record| record.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-07-02", "2024-07-04"]);
        pool.close().await;
    }

    #[tokio::test]
    async fn shift_demand_touches_every_day_and_rebalances() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store
            .store_days(vec![
                seeded("2024-07-01", 100.0, 120.0),
                seeded("2024-07-02", 100.0, 120.0),
            ])
            .await
            .expect("seed days");

        let changed = store.shift_demand(10.0).await.expect("shift demand");
        assert_eq!(changed, 2);

        let records = store.fetch_all().await.expect("fetch all");
        assert_eq!(records[0].demand, 110.0);
        assert_eq!(records[0].inventory, 10.0);
        assert_eq!(records[1].inventory, 20.0);
        assert!(ledger::holds(0.0, &records));
        pool.close().await;
    }

    #[tokio::test]
    async fn forecast_rows_extend_the_series_with_carried_balance() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store.store_days(vec![seeded("2024-07-01", 100.0, 130.0)]).await.expect("seed");

        let written = store
            .write_forecasts(&[(day("2024-07-02"), 104.5), (day("2024-07-03"), 104.5)])
            .await
            .expect("write forecasts");
        assert_eq!(written, 2);

        let records = store.fetch_all().await.expect("fetch all");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].forecast, Some(104.5));
        assert_eq!(records[1].demand, 0.0);
        assert_eq!(records[1].inventory, 30.0);
        assert_eq!(records[2].inventory, 30.0);
        pool.close().await;
    }

    #[tokio::test]
    async fn clearing_forecasts_reports_cleared_days() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store.store_days(vec![seeded("2024-07-01", 100.0, 130.0)]).await.expect("seed");
        store.write_forecasts(&[(day("2024-07-02"), 99.0)]).await.expect("write forecast");

        let cleared = store.clear_forecasts().await.expect("clear forecasts");
        assert_eq!(cleared, 1);

        let records = store.fetch_all().await.expect("fetch all");
        assert!(records.iter().all(|record| record.forecast.is_none()));
        pool.close().await;
    }

    #[tokio::test]
    async fn delete_all_reports_removed_days() {
        let pool = setup_pool().await;
        let store = SqlRecordStore::new(pool.clone());
        store
            .store_days(vec![
                seeded("2024-07-01", 100.0, 120.0),
                seeded("2024-07-02", 100.0, 120.0),
            ])
            .await
            .expect("seed days");

        let removed = store.delete_all().await.expect("delete all");
        assert_eq!(removed, 2);
        assert!(store.fetch_all().await.expect("fetch all").is_empty());
        pool.close().await;
    }
}
