//! Running inventory balance math.
//!
//! The stored series must satisfy, for consecutive stored days,
//! `inventory[d] = inventory[prev] + production[d] - demand[d]` with an
//! opening balance of 0 before the first stored day. Storage backends load the
//! affected forward range and call [`replay_balances`] inside their write
//! transaction; tests reuse it as the reference for the same invariant.

use crate::domain::record::DailyRecord;

/// Recomputes inventory over `records`, which must be sorted ascending by
/// date, folding forward from `opening` (the inventory stored on the last day
/// before the slice, 0 when none). Idempotent for a fixed input.
pub fn replay_balances(opening: f64, records: &mut [DailyRecord]) {
    let mut balance = opening;
    for record in records.iter_mut() {
        balance += record.production - record.demand;
        record.inventory = balance;
    }
}

/// True when every consecutive pair in `records` satisfies the balance
/// invariant against `opening`.
pub fn holds(opening: f64, records: &[DailyRecord]) -> bool {
    let mut balance = opening;
    for record in records {
        balance += record.production - record.demand;
        if (record.inventory - balance).abs() > f64::EPSILON {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use crate::calendar::DayKey;
    use crate::domain::record::DailyRecord;

    use super::*;

    fn series(values: &[(f64, f64)]) -> Vec<DailyRecord> {
        let start = DayKey::parse_iso("2024-07-01").unwrap();
        let mut date = start;
        values
            .iter()
            .map(|&(demand, production)| {
                let mut record = DailyRecord::new(date);
                record.demand = demand;
                record.production = production;
                date = date.next();
                record
            })
            .collect()
    }

    #[test]
    fn folds_production_minus_demand_forward() {
        let mut records = series(&[(100.0, 120.0), (110.0, 100.0), (90.0, 100.0)]);
        replay_balances(0.0, &mut records);

        assert_eq!(records[0].inventory, 20.0);
        assert_eq!(records[1].inventory, 10.0);
        assert_eq!(records[2].inventory, 20.0);
        assert!(holds(0.0, &records));
    }

    #[test]
    fn opening_balance_seeds_the_fold() {
        let mut records = series(&[(50.0, 0.0)]);
        replay_balances(200.0, &mut records);
        assert_eq!(records[0].inventory, 150.0);
    }

    #[test]
    fn replay_is_idempotent() {
        let mut records = series(&[(100.0, 90.0), (80.0, 100.0)]);
        replay_balances(0.0, &mut records);
        let first = records.clone();
        replay_balances(0.0, &mut records);
        assert_eq!(records, first);
    }

    #[test]
    fn negative_balances_are_preserved() {
        let mut records = series(&[(150.0, 100.0), (150.0, 100.0)]);
        replay_balances(0.0, &mut records);
        assert_eq!(records[0].inventory, -50.0);
        assert_eq!(records[1].inventory, -100.0);
    }

    #[test]
    fn empty_slice_is_a_no_op() {
        let mut records: Vec<DailyRecord> = Vec::new();
        replay_balances(0.0, &mut records);
        assert!(records.is_empty());
    }
}
