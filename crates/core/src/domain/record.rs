use serde::{Deserialize, Serialize};

use crate::calendar::DayKey;

/// One row of the daily time series, unique by date.
///
/// `inventory` is derived and never user-writable: it is the previous stored
/// day's inventory plus this day's production minus this day's demand, with 0
/// assumed before the first stored day. `forecast` is independent of `demand`
/// and only ever set by the forecast tools.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: DayKey,
    pub demand: f64,
    pub production: f64,
    pub inventory: f64,
    pub forecast: Option<f64>,
}

impl DailyRecord {
    pub fn new(date: DayKey) -> Self {
        Self { date, demand: 0.0, production: 0.0, inventory: 0.0, forecast: None }
    }
}

/// Field-level upsert for a single day. Absent fields keep their stored value;
/// a day is created on first write to any field.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecordPatch {
    pub demand: Option<f64>,
    pub production: Option<f64>,
    pub forecast: Option<Option<f64>>,
}

impl RecordPatch {
    pub fn demand(value: f64) -> Self {
        Self { demand: Some(value), ..Self::default() }
    }

    pub fn production(value: f64) -> Self {
        Self { production: Some(value), ..Self::default() }
    }

    pub fn forecast(value: Option<f64>) -> Self {
        Self { forecast: Some(value), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.demand.is_none() && self.production.is_none() && self.forecast.is_none()
    }

    /// A demand or production write invalidates the running balance from this
    /// day forward; a forecast write does not.
    pub fn touches_balance(&self) -> bool {
        self.demand.is_some() || self.production.is_some()
    }

    pub fn apply(&self, record: &mut DailyRecord) {
        if let Some(demand) = self.demand {
            record.demand = demand;
        }
        if let Some(production) = self.production {
            record.production = production;
        }
        if let Some(forecast) = self.forecast {
            record.forecast = forecast;
        }
    }
}

/// Aggregates over demand or production.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantitySummary {
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
    pub total: f64,
}

/// Aggregates over the running inventory balance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

/// Suggested production for a stockout day; advisory until a mutating tool
/// applies it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanSuggestion {
    pub date: DayKey,
    pub demand: f64,
    pub current_production: f64,
    pub proposed_production: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DailyRecord {
        let mut record = DailyRecord::new(DayKey::parse_iso("2024-07-01").unwrap());
        record.demand = 100.0;
        record.production = 120.0;
        record.inventory = 20.0;
        record
    }

    #[test]
    fn patch_applies_only_named_fields() {
        let mut target = record();
        RecordPatch::demand(140.0).apply(&mut target);

        assert_eq!(target.demand, 140.0);
        assert_eq!(target.production, 120.0);
        assert_eq!(target.forecast, None);
    }

    #[test]
    fn forecast_patch_can_clear_the_field() {
        let mut target = record();
        target.forecast = Some(111.0);
        RecordPatch::forecast(None).apply(&mut target);

        assert_eq!(target.forecast, None);
        assert_eq!(target.demand, 100.0);
    }

    #[test]
    fn balance_sensitivity_tracks_demand_and_production_only() {
        assert!(RecordPatch::demand(1.0).touches_balance());
        assert!(RecordPatch::production(1.0).touches_balance());
        assert!(!RecordPatch::forecast(Some(1.0)).touches_balance());
        assert!(RecordPatch::default().is_empty());
    }
}
