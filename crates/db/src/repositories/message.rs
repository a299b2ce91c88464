use sqlx::{sqlite::SqliteRow, Row};

use haggler_core::domain::message::{Message, MessageDirection, NewMessage};
use haggler_core::domain::negotiation::{NegotiationId, SupplierId};

use super::{parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO message (negotiation_id, supplier_id, direction, body, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.negotiation_id.0)
        .bind(&message.supplier_id.0)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(message.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Message::from_new(message, result.last_insert_rowid()))
    }

    async fn list_for_conversation(
        &self,
        negotiation_id: &NegotiationId,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, negotiation_id, supplier_id, direction, body, sent_at
             FROM message
             WHERE negotiation_id = ? AND supplier_id = ?
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(&negotiation_id.0)
        .bind(&supplier_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn count_by_supplier(
        &self,
        negotiation_id: &NegotiationId,
    ) -> Result<Vec<(SupplierId, i64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT supplier_id, COUNT(*) AS message_count
             FROM message
             WHERE negotiation_id = ?
             GROUP BY supplier_id
             ORDER BY supplier_id ASC",
        )
        .bind(&negotiation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    SupplierId(row.try_get("supplier_id")?),
                    row.try_get::<i64, _>("message_count")?,
                ))
            })
            .collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;

    Ok(Message {
        negotiation_id: NegotiationId(row.try_get("negotiation_id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        direction,
        body: row.try_get("body")?,
        sent_at: parse_timestamp("sent_at", row.try_get("sent_at")?)?,
        sequence: row.try_get("id")?,
    })
}
