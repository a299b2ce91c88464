use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use haggler_core::domain::binding::AgentBinding;
use haggler_core::domain::message::{Message, NewMessage};
use haggler_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, SupplierId,
};
use haggler_core::domain::orphan::{NewOrphanedEvent, OrphanedEvent};

pub mod audit;
pub mod memory;
pub mod message;
pub mod negotiation;
pub mod orphan;

pub use audit::SqlAuditSink;
pub use memory::{
    InMemoryMessageRepository, InMemoryNegotiationRepository, InMemoryOrphanedEventRepository,
};
pub use message::SqlMessageRepository;
pub use negotiation::SqlNegotiationRepository;
pub use orphan::SqlOrphanedEventRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[async_trait]
pub trait NegotiationRepository: Send + Sync {
    /// Persists the negotiation row and its agent bindings atomically.
    async fn insert(
        &self,
        negotiation: Negotiation,
        bindings: Vec<AgentBinding>,
    ) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &NegotiationId) -> Result<Option<Negotiation>, RepositoryError>;

    async fn list(&self) -> Result<Vec<Negotiation>, RepositoryError>;

    async fn update_status(
        &self,
        id: &NegotiationId,
        status: NegotiationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn bindings_for(&self, id: &NegotiationId)
        -> Result<Vec<AgentBinding>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends one conversation row and returns it with the store-assigned
    /// sequence.
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// Full transcript for one (negotiation, supplier) pair, ordered by
    /// timestamp then sequence.
    async fn list_for_conversation(
        &self,
        negotiation_id: &NegotiationId,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn count_by_supplier(
        &self,
        negotiation_id: &NegotiationId,
    ) -> Result<Vec<(SupplierId, i64)>, RepositoryError>;
}

#[async_trait]
pub trait OrphanedEventRepository: Send + Sync {
    async fn record(&self, event: NewOrphanedEvent) -> Result<OrphanedEvent, RepositoryError>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<OrphanedEvent>, RepositoryError>;
}
