use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use haggler_core::domain::binding::{AgentBinding, AgentRole, SupplierContact};
use haggler_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, SupplierId,
};

use super::{parse_timestamp, NegotiationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNegotiationRepository {
    pool: DbPool,
}

impl SqlNegotiationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NegotiationRepository for SqlNegotiationRepository {
    async fn insert(
        &self,
        negotiation: Negotiation,
        bindings: Vec<AgentBinding>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO negotiation (
                id,
                product,
                strategy,
                tactics,
                status,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&negotiation.id.0)
        .bind(&negotiation.product)
        .bind(&negotiation.strategy)
        .bind(&negotiation.tactics)
        .bind(negotiation.status.as_str())
        .bind(negotiation.created_at.to_rfc3339())
        .bind(negotiation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for binding in &bindings {
            sqlx::query(
                "INSERT INTO agent_binding (
                    negotiation_id,
                    role,
                    supplier_id,
                    address,
                    insights,
                    instructions,
                    created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(binding.negotiation_id().0.as_str())
            .bind(binding.role().as_str())
            .bind(binding.supplier_id().map(|id| id.0.as_str()))
            .bind(binding.contact().map(|contact| contact.address.as_str()))
            .bind(binding.contact().and_then(|contact| contact.insights.as_deref()))
            .bind(binding.instructions())
            .bind(negotiation.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &NegotiationId) -> Result<Option<Negotiation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, product, strategy, tactics, status, created_at, updated_at
             FROM negotiation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(negotiation_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Negotiation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, product, strategy, tactics, status, created_at, updated_at
             FROM negotiation
             ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(negotiation_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &NegotiationId,
        status: NegotiationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE negotiation SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(updated_at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn bindings_for(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<AgentBinding>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT negotiation_id, role, supplier_id, address, insights, instructions
             FROM agent_binding
             WHERE negotiation_id = ?
             ORDER BY id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(binding_from_row).collect()
    }
}

fn negotiation_from_row(row: SqliteRow) -> Result<Negotiation, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = NegotiationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown negotiation status `{status_raw}`"))
    })?;

    Ok(Negotiation {
        id: NegotiationId(row.try_get("id")?),
        product: row.try_get("product")?,
        strategy: row.try_get("strategy")?,
        tactics: row.try_get("tactics")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn binding_from_row(row: SqliteRow) -> Result<AgentBinding, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = AgentRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown agent role `{role_raw}`")))?;

    let negotiation_id = NegotiationId(row.try_get("negotiation_id")?);
    let instructions: String = row.try_get("instructions")?;

    match role {
        AgentRole::Negotiator => {
            let supplier_id = row.try_get::<Option<String>, _>("supplier_id")?.ok_or_else(|| {
                RepositoryError::Decode("negotiator binding is missing supplier_id".to_string())
            })?;
            let address = row.try_get::<Option<String>, _>("address")?.ok_or_else(|| {
                RepositoryError::Decode("negotiator binding is missing address".to_string())
            })?;

            Ok(AgentBinding::Negotiator {
                negotiation_id,
                contact: SupplierContact {
                    supplier_id: SupplierId(supplier_id),
                    address,
                    insights: row.try_get("insights")?,
                },
                instructions,
            })
        }
        AgentRole::Orchestrator => Ok(AgentBinding::Orchestrator { negotiation_id, instructions }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use haggler_core::domain::binding::{AgentBinding, SupplierContact};
    use haggler_core::domain::negotiation::{
        Negotiation, NegotiationId, NegotiationStatus, SupplierId,
    };

    use super::SqlNegotiationRepository;
    use crate::migrations;
    use crate::repositories::NegotiationRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_negotiation_repo_round_trip_with_bindings() {
        let pool = setup_pool().await;
        let repo = SqlNegotiationRepository::new(pool.clone());

        let negotiation = sample_negotiation("neg-round-trip");
        let bindings = vec![
            AgentBinding::Negotiator {
                negotiation_id: negotiation.id.clone(),
                contact: SupplierContact {
                    supplier_id: SupplierId("acme".to_string()),
                    address: "sales@acme.example".to_string(),
                    insights: Some("prefers volume commitments".to_string()),
                },
                instructions: "push unit price below 100".to_string(),
            },
            AgentBinding::Negotiator {
                negotiation_id: negotiation.id.clone(),
                contact: SupplierContact {
                    supplier_id: SupplierId("globex".to_string()),
                    address: "quotes@globex.example".to_string(),
                    insights: None,
                },
                instructions: "push unit price below 100".to_string(),
            },
            AgentBinding::Orchestrator {
                negotiation_id: negotiation.id.clone(),
                instructions: "compare supplier positions".to_string(),
            },
        ];

        repo.insert(negotiation.clone(), bindings.clone()).await.expect("insert negotiation");

        let found = repo.find_by_id(&negotiation.id).await.expect("find negotiation");
        assert_eq!(found, Some(negotiation.clone()));

        let stored_bindings = repo.bindings_for(&negotiation.id).await.expect("load bindings");
        assert_eq!(stored_bindings, bindings);

        pool.close().await;
    }

    #[tokio::test]
    async fn status_update_is_visible_on_next_read() {
        let pool = setup_pool().await;
        let repo = SqlNegotiationRepository::new(pool.clone());

        let negotiation = sample_negotiation("neg-status");
        repo.insert(negotiation.clone(), Vec::new()).await.expect("insert negotiation");

        let activated_at = parse_ts("2026-06-20T09:30:00Z");
        repo.update_status(&negotiation.id, NegotiationStatus::Active, activated_at)
            .await
            .expect("update status");

        let found = repo
            .find_by_id(&negotiation.id)
            .await
            .expect("find negotiation")
            .expect("negotiation exists");
        assert_eq!(found.status, NegotiationStatus::Active);
        assert_eq!(found.updated_at, activated_at);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let pool = setup_pool().await;
        let repo = SqlNegotiationRepository::new(pool.clone());

        let negotiation = sample_negotiation("neg-dup");
        repo.insert(negotiation.clone(), Vec::new()).await.expect("first insert");

        let second = repo.insert(negotiation, Vec::new()).await;
        assert!(second.is_err(), "second insert with the same id should fail");

        pool.close().await;
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let pool = setup_pool().await;
        let repo = SqlNegotiationRepository::new(pool.clone());

        let mut older = sample_negotiation("neg-older");
        older.created_at = parse_ts("2026-06-18T08:00:00Z");
        older.updated_at = older.created_at;
        let mut newer = sample_negotiation("neg-newer");
        newer.created_at = parse_ts("2026-06-19T08:00:00Z");
        newer.updated_at = newer.created_at;

        repo.insert(older.clone(), Vec::new()).await.expect("insert older");
        repo.insert(newer.clone(), Vec::new()).await.expect("insert newer");

        let listed = repo.list().await.expect("list negotiations");
        assert_eq!(listed, vec![newer, older]);

        pool.close().await;
    }

    // One connection keeps the private in-memory database alive for the
    // whole test.
    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_negotiation(id: &str) -> Negotiation {
        Negotiation {
            id: NegotiationId(id.to_string()),
            product: "2000 units of 14ga steel brackets".to_string(),
            strategy: "target 92 per unit, walk away above 110".to_string(),
            tactics: "anchor low, trade volume for price".to_string(),
            status: NegotiationStatus::Pending,
            created_at: parse_ts("2026-06-19T10:00:00Z"),
            updated_at: parse_ts("2026-06-19T10:00:00Z"),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
