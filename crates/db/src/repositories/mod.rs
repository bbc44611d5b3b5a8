use async_trait::async_trait;
use thiserror::Error;

use stocky_core::calendar::DayKey;
use stocky_core::domain::message::{ConversationMessage, MessagePayload, Role, SessionId};
use stocky_core::domain::record::{
    DailyRecord, InventorySummary, QuantitySummary, RecordPatch,
};

pub mod memory;
pub mod records;
pub mod transcript;

pub use memory::{InMemoryRecordStore, InMemoryTranscriptStore};
pub use records::SqlRecordStore;
pub use transcript::SqlTranscriptStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Persistence surface for the daily time series.
///
/// Any write that changes demand or production must leave the running balance
/// consistent for every stored day at or after the written date before the
/// call returns. Implementations recompute the affected forward range inside
/// the same transaction as the write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_day(&self, date: DayKey) -> Result<Option<DailyRecord>, StorageError>;

    /// All stored days, ascending by date.
    async fn fetch_all(&self) -> Result<Vec<DailyRecord>, StorageError>;

    /// Creates or updates the day, then rebalances forward when the patch
    /// touches demand or production. Returns the stored row after rebalance.
    async fn apply_patch(
        &self,
        date: DayKey,
        patch: RecordPatch,
    ) -> Result<DailyRecord, StorageError>;

    /// Bulk upsert, then one rebalance from the earliest written date.
    async fn store_days(&self, rows: Vec<DailyRecord>) -> Result<u64, StorageError>;

    async fn demand_summary(&self) -> Result<Option<QuantitySummary>, StorageError>;

    async fn production_summary(&self) -> Result<Option<QuantitySummary>, StorageError>;

    async fn inventory_summary(&self) -> Result<Option<InventorySummary>, StorageError>;

    /// Days whose running balance is zero or negative, ascending by date.
    async fn stockout_days(&self) -> Result<Vec<DailyRecord>, StorageError>;

    /// Adds `offset` to every stored day's demand and rebalances the whole
    /// series. Returns the number of days changed.
    async fn shift_demand(&self, offset: f64) -> Result<u64, StorageError>;

    /// Writes forecast values, creating zero-quantity rows for days not yet
    /// stored, and carries the running balance onto any created rows.
    async fn write_forecasts(&self, values: &[(DayKey, f64)]) -> Result<u64, StorageError>;

    async fn clear_forecasts(&self) -> Result<u64, StorageError>;

    async fn delete_all(&self) -> Result<u64, StorageError>;
}

/// Append-only conversation transcript keyed by session.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Appends one row, assigning the next sequence number for the session,
    /// and returns the stored message.
    async fn append(
        &self,
        session: &SessionId,
        role: Role,
        content: &str,
        payload: Option<&MessagePayload>,
    ) -> Result<ConversationMessage, StorageError>;

    /// Full transcript for the session in insertion order.
    async fn history(&self, session: &SessionId) -> Result<Vec<ConversationMessage>, StorageError>;
}
