pub mod connection;
pub mod fixtures;
pub mod repositories;
pub mod schema;

pub use connection::{connect, connect_with_settings, DbPool, StorageBackend};
pub use fixtures::{DemoDataset, SeedResult, VerificationResult, DEFAULT_SEED_DAYS};
pub use repositories::{
    InMemoryRecordStore, InMemoryTranscriptStore, RecordStore, SqlRecordStore, SqlTranscriptStore,
    StorageError, TranscriptStore,
};
pub use schema::ensure_schema;
