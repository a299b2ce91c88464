use sqlx::{sqlite::SqliteRow, Row};

use haggler_core::domain::orphan::{NewOrphanedEvent, OrphanedEvent};

use super::{parse_timestamp, OrphanedEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrphanedEventRepository {
    pool: DbPool,
}

impl SqlOrphanedEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrphanedEventRepository for SqlOrphanedEventRepository {
    async fn record(&self, event: NewOrphanedEvent) -> Result<OrphanedEvent, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO orphaned_event (
                sender_address,
                subject,
                body,
                thread_key,
                reason,
                received_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.sender_address)
        .bind(event.subject.as_deref())
        .bind(&event.body)
        .bind(event.thread_key.as_deref())
        .bind(&event.reason)
        .bind(event.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(OrphanedEvent::from_new(event, result.last_insert_rowid()))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<OrphanedEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, sender_address, subject, body, thread_key, reason, received_at
             FROM orphaned_event
             ORDER BY received_at DESC, id DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(orphan_from_row).collect()
    }
}

fn orphan_from_row(row: SqliteRow) -> Result<OrphanedEvent, RepositoryError> {
    Ok(OrphanedEvent {
        id: row.try_get("id")?,
        sender_address: row.try_get("sender_address")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        thread_key: row.try_get("thread_key")?,
        reason: row.try_get("reason")?,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use haggler_core::domain::orphan::NewOrphanedEvent;

    use super::SqlOrphanedEventRepository;
    use crate::migrations;
    use crate::repositories::OrphanedEventRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn recorded_orphans_survive_for_review() {
        let pool = setup_pool().await;
        let repo = SqlOrphanedEventRepository::new(pool.clone());

        let recorded = repo
            .record(NewOrphanedEvent {
                sender_address: "mystery@vendor.example".to_string(),
                subject: Some("Re: bracket pricing".to_string()),
                body: "our best price is 98".to_string(),
                thread_key: Some("msg-unknown-17".to_string()),
                reason: "thread key does not match any live conversation".to_string(),
                received_at: parse_ts("2026-06-19T14:00:00Z"),
            })
            .await
            .expect("record orphan");

        assert!(recorded.id > 0, "store should assign a row id");

        let listed = repo.list_recent(10).await.expect("list orphans");
        assert_eq!(listed, vec![recorded]);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first_and_respects_limit() {
        let pool = setup_pool().await;
        let repo = SqlOrphanedEventRepository::new(pool.clone());

        for (address, stamp) in [
            ("a@vendor.example", "2026-06-19T14:00:00Z"),
            ("b@vendor.example", "2026-06-19T15:00:00Z"),
            ("c@vendor.example", "2026-06-19T16:00:00Z"),
        ] {
            repo.record(NewOrphanedEvent {
                sender_address: address.to_string(),
                subject: None,
                body: "unroutable".to_string(),
                thread_key: None,
                reason: "no active conversation matches sender address".to_string(),
                received_at: parse_ts(stamp),
            })
            .await
            .expect("record orphan");
        }

        let listed = repo.list_recent(2).await.expect("list orphans");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].sender_address, "c@vendor.example");
        assert_eq!(listed[1].sender_address, "b@vendor.example");

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
