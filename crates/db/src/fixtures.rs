//! Synthetic demo data.
//!
//! Demand and production are drawn uniformly from 50..=150 units per day,
//! which reliably produces a mix of surplus days and stockouts for demos and
//! end-to-end tests.

use std::ops::RangeInclusive;

use rand::Rng;

use stocky_core::calendar::DayKey;
use stocky_core::domain::record::DailyRecord;
use stocky_core::ledger;

use crate::repositories::{RecordStore, StorageError};

pub const DEFAULT_SEED_DAYS: u32 = 30;

const QUANTITY_RANGE: RangeInclusive<i64> = 50..=150;

pub struct DemoDataset;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeedResult {
    pub days_seeded: u64,
    pub first_day: DayKey,
    pub last_day: DayKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub days_checked: u64,
    pub balanced: bool,
}

impl DemoDataset {
    /// Synthesizes `days` consecutive records starting at `start`. Quantities
    /// are whole units; inventory is left for the store's rebalance.
    pub fn generate(start: DayKey, days: u32) -> Vec<DailyRecord> {
        let mut rng = rand::thread_rng();
        let mut date = start;
        (0..days)
            .map(|_| {
                let mut record = DailyRecord::new(date);
                record.demand = rng.gen_range(QUANTITY_RANGE) as f64;
                record.production = rng.gen_range(QUANTITY_RANGE) as f64;
                date = date.next();
                record
            })
            .collect()
    }

    pub async fn seed(
        store: &dyn RecordStore,
        start: DayKey,
        days: u32,
    ) -> Result<SeedResult, StorageError> {
        let rows = Self::generate(start, days);
        let first_day = rows.first().map(|record| record.date).unwrap_or(start);
        let last_day = rows.last().map(|record| record.date).unwrap_or(start);
        let days_seeded = store.store_days(rows).await?;

        Ok(SeedResult { days_seeded, first_day, last_day })
    }

    /// Checks the running-balance identity over every stored day.
    pub async fn verify(store: &dyn RecordStore) -> Result<VerificationResult, StorageError> {
        let records = store.fetch_all().await?;
        Ok(VerificationResult {
            days_checked: records.len() as u64,
            balanced: ledger::holds(0.0, &records),
        })
    }
}
