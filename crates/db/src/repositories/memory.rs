use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tokio::sync::RwLock;

use stocky_core::calendar::DayKey;
use stocky_core::domain::message::{ConversationMessage, MessagePayload, Role, SessionId};
use stocky_core::domain::record::{
    DailyRecord, InventorySummary, QuantitySummary, RecordPatch,
};
use stocky_core::ledger;

use super::{RecordStore, StorageError, TranscriptStore};

/// Map-backed [`RecordStore`] with the same rebalance semantics as the SQL
/// store. Used by agent-level tests and anywhere a database is overkill.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<DayKey, DailyRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rebalance(records: &mut BTreeMap<DayKey, DailyRecord>, from: DayKey) {
    let opening =
        records.range(..from).next_back().map(|(_, record)| record.inventory).unwrap_or(0.0);
    let mut affected: Vec<DailyRecord> =
        records.range(from..).map(|(_, record)| record.clone()).collect();
    ledger::replay_balances(opening, &mut affected);
    for record in affected {
        records.insert(record.date, record);
    }
}

fn summarize<I: Iterator<Item = f64>>(values: I) -> Option<QuantitySummary> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return None;
    }
    let total: f64 = values.iter().sum();
    Some(QuantitySummary {
        average: total / values.len() as f64,
        maximum: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        minimum: values.iter().copied().fold(f64::INFINITY, f64::min),
        total,
    })
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_day(&self, date: DayKey) -> Result<Option<DailyRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records.get(&date).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<DailyRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn apply_patch(
        &self,
        date: DayKey,
        patch: RecordPatch,
    ) -> Result<DailyRecord, StorageError> {
        let mut records = self.records.write().await;
        let mut record = records.get(&date).cloned().unwrap_or_else(|| DailyRecord::new(date));
        patch.apply(&mut record);
        records.insert(date, record);
        if patch.touches_balance() {
            rebalance(&mut records, date);
        }
        records
            .get(&date)
            .cloned()
            .ok_or_else(|| StorageError::Decode(format!("day `{date}` vanished during patch")))
    }

    async fn store_days(&self, rows: Vec<DailyRecord>) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut records = self.records.write().await;
        let mut earliest = rows[0].date;
        let written = rows.len() as u64;
        for row in rows {
            earliest = earliest.min(row.date);
            records.insert(row.date, row);
        }
        rebalance(&mut records, earliest);
        Ok(written)
    }

    async fn demand_summary(&self) -> Result<Option<QuantitySummary>, StorageError> {
        let records = self.records.read().await;
        Ok(summarize(records.values().map(|record| record.demand)))
    }

    async fn production_summary(&self) -> Result<Option<QuantitySummary>, StorageError> {
        let records = self.records.read().await;
        Ok(summarize(records.values().map(|record| record.production)))
    }

    async fn inventory_summary(&self) -> Result<Option<InventorySummary>, StorageError> {
        let records = self.records.read().await;
        Ok(summarize(records.values().map(|record| record.inventory)).map(|summary| {
            InventorySummary {
                average: summary.average,
                maximum: summary.maximum,
                minimum: summary.minimum,
            }
        }))
    }

    async fn stockout_days(&self) -> Result<Vec<DailyRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records.values().filter(|record| record.inventory <= 0.0).cloned().collect())
    }

    async fn shift_demand(&self, offset: f64) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let changed = records.len() as u64;
        for record in records.values_mut() {
            record.demand += offset;
        }
        if let Some(first) = records.keys().next().copied() {
            rebalance(&mut records, first);
        }
        Ok(changed)
    }

    async fn write_forecasts(&self, values: &[(DayKey, f64)]) -> Result<u64, StorageError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut records = self.records.write().await;
        let mut earliest = values[0].0;
        for (date, value) in values {
            earliest = earliest.min(*date);
            let record = records.entry(*date).or_insert_with(|| DailyRecord::new(*date));
            record.forecast = Some(*value);
        }
        rebalance(&mut records, earliest);
        Ok(values.len() as u64)
    }

    async fn clear_forecasts(&self) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let mut cleared = 0;
        for record in records.values_mut() {
            if record.forecast.take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }
}

/// Map-backed [`TranscriptStore`].
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    messages: RwLock<HashMap<String, Vec<ConversationMessage>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn append(
        &self,
        session: &SessionId,
        role: Role,
        content: &str,
        payload: Option<&MessagePayload>,
    ) -> Result<ConversationMessage, StorageError> {
        let mut messages = self.messages.write().await;
        let entry = messages.entry(session.as_str().to_string()).or_default();
        let message = ConversationMessage {
            session_id: session.clone(),
            seq: entry.len() as i64 + 1,
            role,
            content: content.to_string(),
            payload: payload.cloned(),
            created_at: Utc::now(),
        };
        entry.push(message.clone());
        Ok(message)
    }

    async fn history(&self, session: &SessionId) -> Result<Vec<ConversationMessage>, StorageError> {
        let messages = self.messages.read().await;
        Ok(messages.get(session.as_str()).cloned().unwrap_or_default())
    }
}
