use tokio::sync::mpsc;

use haggler_core::audit::{AuditEvent, AuditSink};

use crate::DbPool;

/// Durable audit sink. `emit` hands the event to a background writer so
/// callers never wait on the database; a failed insert is logged and the
/// event dropped rather than surfaced to the emitting flow.
pub struct SqlAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl SqlAuditSink {
    /// Must be called from within a tokio runtime; the writer task lives
    /// until every clone of the sink is dropped.
    pub fn spawn(pool: DbPool) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEvent>();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = insert_event(&pool, &event).await {
                    tracing::warn!(
                        event_name = "audit.persist_failed",
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        error = %error,
                        "audit event could not be persisted"
                    );
                }
            }
        });

        Self { sender }
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        // Send only fails once the writer task is gone, which happens at
        // shutdown; nothing useful is left to do with the event then.
        let _ = self.sender.send(event);
    }
}

async fn insert_event(pool: &DbPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let metadata_json =
        serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        "INSERT INTO audit_event (
            event_id,
            negotiation_id,
            supplier_id,
            correlation_id,
            event_type,
            category,
            actor,
            outcome,
            metadata_json,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.negotiation_id.as_ref().map(|id| id.0.as_str()))
    .bind(event.supplier_id.as_ref().map(|id| id.0.as_str()))
    .bind(&event.correlation_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(metadata_json)
    .bind(event.occurred_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
