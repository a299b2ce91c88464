use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use haggler_core::domain::binding::AgentBinding;
use haggler_core::domain::message::{Message, NewMessage};
use haggler_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, SupplierId,
};
use haggler_core::domain::orphan::{NewOrphanedEvent, OrphanedEvent};

use super::{
    MessageRepository, NegotiationRepository, OrphanedEventRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryNegotiationRepository {
    negotiations: RwLock<HashMap<String, Negotiation>>,
    bindings: RwLock<HashMap<String, Vec<AgentBinding>>>,
}

#[async_trait::async_trait]
impl NegotiationRepository for InMemoryNegotiationRepository {
    async fn insert(
        &self,
        negotiation: Negotiation,
        new_bindings: Vec<AgentBinding>,
    ) -> Result<(), RepositoryError> {
        let mut negotiations = self.negotiations.write().await;
        let mut bindings = self.bindings.write().await;
        bindings.insert(negotiation.id.0.clone(), new_bindings);
        negotiations.insert(negotiation.id.0.clone(), negotiation);
        Ok(())
    }

    async fn find_by_id(&self, id: &NegotiationId) -> Result<Option<Negotiation>, RepositoryError> {
        let negotiations = self.negotiations.read().await;
        Ok(negotiations.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Negotiation>, RepositoryError> {
        let negotiations = self.negotiations.read().await;
        let mut all: Vec<Negotiation> = negotiations.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(all)
    }

    async fn update_status(
        &self,
        id: &NegotiationId,
        status: NegotiationStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut negotiations = self.negotiations.write().await;
        if let Some(negotiation) = negotiations.get_mut(&id.0) {
            negotiation.status = status;
            negotiation.updated_at = updated_at;
        }
        Ok(())
    }

    async fn bindings_for(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<AgentBinding>, RepositoryError> {
        let bindings = self.bindings.read().await;
        Ok(bindings.get(&id.0).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    rows: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut rows = self.rows.write().await;
        // Rows are never removed, so length + 1 is a monotonic sequence.
        let sequence = rows.len() as i64 + 1;
        let message = Message::from_new(message, sequence);
        rows.push(message.clone());
        Ok(message)
    }

    async fn list_for_conversation(
        &self,
        negotiation_id: &NegotiationId,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = self.rows.read().await;
        let mut transcript: Vec<Message> = rows
            .iter()
            .filter(|message| {
                message.negotiation_id == *negotiation_id && message.supplier_id == *supplier_id
            })
            .cloned()
            .collect();
        transcript
            .sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.sequence.cmp(&b.sequence)));
        Ok(transcript)
    }

    async fn count_by_supplier(
        &self,
        negotiation_id: &NegotiationId,
    ) -> Result<Vec<(SupplierId, i64)>, RepositoryError> {
        let rows = self.rows.read().await;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for message in rows.iter().filter(|message| message.negotiation_id == *negotiation_id) {
            *counts.entry(message.supplier_id.0.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().map(|(supplier, count)| (SupplierId(supplier), count)).collect())
    }
}

#[derive(Default)]
pub struct InMemoryOrphanedEventRepository {
    events: RwLock<Vec<OrphanedEvent>>,
}

#[async_trait::async_trait]
impl OrphanedEventRepository for InMemoryOrphanedEventRepository {
    async fn record(&self, event: NewOrphanedEvent) -> Result<OrphanedEvent, RepositoryError> {
        let mut events = self.events.write().await;
        let event = OrphanedEvent::from_new(event, events.len() as i64 + 1);
        events.push(event.clone());
        Ok(event)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<OrphanedEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut recent: Vec<OrphanedEvent> = events.clone();
        recent.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(b.id.cmp(&a.id)));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}
