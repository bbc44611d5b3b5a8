use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;

use stocky_core::domain::message::{ConversationMessage, MessagePayload, Role, SessionId};

use super::{StorageError, TranscriptStore};
use crate::DbPool;

pub struct SqlTranscriptStore {
    pool: DbPool,
}

impl SqlTranscriptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TranscriptStore for SqlTranscriptStore {
    async fn append(
        &self,
        session: &SessionId,
        role: Role,
        content: &str,
        payload: Option<&MessagePayload>,
    ) -> Result<ConversationMessage, StorageError> {
        let payload_json = payload
            .map(|payload| {
                serde_json::to_string(payload).map_err(|error| {
                    StorageError::Decode(format!("unencodable message payload: {error}"))
                })
            })
            .transpose()?;
        let created_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM conversation_history WHERE session_id = $1",
        )
        .bind(session.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_history (session_id, seq, role, content, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.as_str())
        .bind(seq)
        .bind(role.as_str())
        .bind(content)
        .bind(payload_json.as_deref())
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ConversationMessage {
            session_id: session.clone(),
            seq,
            role,
            content: content.to_string(),
            payload: payload.cloned(),
            created_at,
        })
    }

    async fn history(&self, session: &SessionId) -> Result<Vec<ConversationMessage>, StorageError> {
        let rows = sqlx::query(
            "SELECT session_id, seq, role, content, payload, created_at
             FROM conversation_history
             WHERE session_id = $1
             ORDER BY seq ASC",
        )
        .bind(session.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: AnyRow) -> Result<ConversationMessage, StorageError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| StorageError::Decode(format!("unknown transcript role `{role_raw}`")))?;

    let payload = row
        .try_get::<Option<String>, _>("payload")?
        .map(|raw| {
            serde_json::from_str::<MessagePayload>(&raw).map_err(|error| {
                StorageError::Decode(format!("invalid message payload: {error}"))
            })
        })
        .transpose()?;

    Ok(ConversationMessage {
        session_id: SessionId(row.try_get("session_id")?),
        seq: row.try_get("seq")?,
        role,
        content: row.try_get("content")?,
        payload,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            StorageError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
