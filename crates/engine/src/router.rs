//! Inbound event routing.
//!
//! Every inbound email event funnels through the [`EventRouter`], which
//! resolves it to exactly one (negotiation, supplier) conversation or
//! records it as orphaned. Resolution order: thread key registered at
//! outbound-send time, then case-insensitive sender address across live
//! sessions. Dispatch admits the event durably and enqueues it; reply
//! generation happens on the owning conversation's worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use haggler_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use haggler_core::{EngineError, NegotiationId, NewOrphanedEvent, SupplierId};
use haggler_db::repositories::OrphanedEventRepository;
use haggler_mail::envelope::InboundEmail;
use haggler_mail::runner::{DeliveryContext, DeliveryError, InboundSink};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::registry::SessionRegistry;
use crate::session::{EnqueueError, InboundWork, NegotiationSession};

/// Identity of one conversation: the (negotiation, supplier) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub negotiation_id: NegotiationId,
    pub supplier_id: SupplierId,
}

#[derive(Default)]
struct ThreadIndexState {
    by_thread: HashMap<String, ConversationKey>,
    by_negotiation: HashMap<NegotiationId, Vec<String>>,
}

/// Map from outbound thread keys to the conversation that sent them.
///
/// Sessions register the gateway receipt ref for every outbound send;
/// inbound replies carrying that ref in their thread header route straight
/// back. Keys live until their negotiation is evicted, keeping the index
/// bounded by live negotiations.
#[derive(Clone, Default)]
pub struct ThreadIndex {
    inner: Arc<RwLock<ThreadIndexState>>,
}

impl ThreadIndex {
    pub async fn register(&self, thread_key: impl Into<String>, key: ConversationKey) {
        let thread_key = thread_key.into();
        let mut state = self.inner.write().await;
        state
            .by_negotiation
            .entry(key.negotiation_id.clone())
            .or_default()
            .push(thread_key.clone());
        state.by_thread.insert(thread_key, key);
    }

    pub async fn resolve(&self, thread_key: &str) -> Option<ConversationKey> {
        self.inner.read().await.by_thread.get(thread_key).cloned()
    }

    pub async fn remove_negotiation(&self, negotiation_id: &NegotiationId) {
        let mut state = self.inner.write().await;
        if let Some(keys) = state.by_negotiation.remove(negotiation_id) {
            for key in keys {
                state.by_thread.remove(&key);
            }
        }
    }
}

/// Where one routed event ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingDisposition {
    Dispatched { negotiation_id: NegotiationId, supplier_id: SupplierId, ambiguous: bool },
    Orphaned { reason: String },
}

pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    threads: ThreadIndex,
    orphans: Arc<dyn OrphanedEventRepository>,
    audit: Arc<dyn AuditSink>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        threads: ThreadIndex,
        orphans: Arc<dyn OrphanedEventRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, threads, orphans, audit }
    }

    /// Resolves one inbound event and admits it onto the owning
    /// conversation, or records it as orphaned. Errors when the store
    /// refuses either write (the inbound row for a matched event, or the
    /// orphan record), so callers can hold the transport envelope
    /// unacknowledged for redelivery.
    pub async fn route(
        &self,
        email: InboundEmail,
        correlation_id: &str,
    ) -> Result<RoutingDisposition, EngineError> {
        if let Some(thread_key) = email.thread_key.clone() {
            if let Some(key) = self.threads.resolve(&thread_key).await {
                return match self.registry.get(&key.negotiation_id).await {
                    Some(session) => {
                        self.dispatch(&session, key.supplier_id, email, correlation_id, "thread_key", 1)
                            .await
                    }
                    None => {
                        // The thread key is authoritative: no fall-through to
                        // address matching, which could land the reply in a
                        // different negotiation.
                        let reason = format!(
                            "thread key maps to negotiation `{}` which is no longer active",
                            key.negotiation_id
                        );
                        self.orphan(email, reason, correlation_id).await
                    }
                };
            }
        }

        let mut candidates = Vec::new();
        for session in self.registry.active_sessions().await {
            if let Some(supplier_id) = session.supplier_for_address(&email.from_address) {
                let last_activity = session.last_activity().await;
                candidates.push((session, supplier_id, last_activity));
            }
        }

        match candidates.len() {
            0 => {
                self.orphan(
                    email,
                    "no active conversation matches sender address".to_string(),
                    correlation_id,
                )
                .await
            }
            1 => {
                let (session, supplier_id, _) = candidates.remove(0);
                self.dispatch(&session, supplier_id, email, correlation_id, "address", 1).await
            }
            total => {
                candidates.sort_by_key(|(_, _, last_activity)| *last_activity);
                let (session, supplier_id, _) = candidates.remove(total - 1);
                self.dispatch(&session, supplier_id, email, correlation_id, "address", total).await
            }
        }
    }

    async fn dispatch(
        &self,
        session: &Arc<NegotiationSession>,
        supplier_id: SupplierId,
        email: InboundEmail,
        correlation_id: &str,
        matched_by: &str,
        candidates: usize,
    ) -> Result<RoutingDisposition, EngineError> {
        let negotiation_id = session.negotiation_id().clone();
        let work = InboundWork {
            body: email.body.clone(),
            received_at: email.received_at,
            correlation_id: correlation_id.to_string(),
        };

        if let Err(error) = session.enqueue_inbound(&supplier_id, work).await {
            let reason = match error {
                EnqueueError::UnknownSupplier => format!(
                    "resolved supplier `{supplier_id}` is not bound to negotiation `{negotiation_id}`"
                ),
                EnqueueError::WorkerStopped => format!(
                    "conversation worker for supplier `{supplier_id}` in negotiation `{negotiation_id}` has stopped"
                ),
                // The event matched a live conversation but its row could
                // not be appended. Not an orphan: surfacing the store
                // failure leaves the envelope unacknowledged, so the
                // gateway redelivers the event once the store recovers.
                EnqueueError::StoreUnavailable(reason) => {
                    warn!(
                        event_name = "router.admission_failed",
                        correlation_id,
                        negotiation_id = %negotiation_id,
                        supplier_id = %supplier_id,
                        reason = %reason,
                        "matched event held for redelivery"
                    );
                    return Err(EngineError::StoreUnavailable(reason));
                }
            };
            return self.orphan(email, reason, correlation_id).await;
        }

        let ambiguous = candidates > 1;
        info!(
            event_name = "router.event_routed",
            correlation_id,
            negotiation_id = %negotiation_id,
            supplier_id = %supplier_id,
            matched_by,
            ambiguous,
            "inbound event routed"
        );
        let mut event = AuditEvent::new(
            Some(negotiation_id.clone()),
            Some(supplier_id.clone()),
            correlation_id,
            "router.event_routed",
            AuditCategory::Routing,
            "event-router",
            AuditOutcome::Success,
        )
        .with_metadata("matched_by", matched_by)
        .with_metadata("from_address", &email.from_address);
        if ambiguous {
            event = event
                .with_metadata("ambiguous", "true")
                .with_metadata("candidates", candidates.to_string());
        }
        self.audit.emit(event);

        Ok(RoutingDisposition::Dispatched { negotiation_id, supplier_id, ambiguous })
    }

    async fn orphan(
        &self,
        email: InboundEmail,
        reason: String,
        correlation_id: &str,
    ) -> Result<RoutingDisposition, EngineError> {
        warn!(
            event_name = "router.event_orphaned",
            correlation_id,
            from_address = %email.from_address,
            reason = %reason,
            "inbound event orphaned"
        );

        let record = NewOrphanedEvent {
            sender_address: email.from_address.clone(),
            subject: email.subject,
            body: email.body,
            thread_key: email.thread_key,
            reason: reason.clone(),
            received_at: email.received_at,
        };
        match self.orphans.record(record).await {
            Ok(_) => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        None,
                        correlation_id,
                        "router.event_orphaned",
                        AuditCategory::Routing,
                        "event-router",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from_address", &email.from_address)
                    .with_metadata("reason", &reason),
                );
                Ok(RoutingDisposition::Orphaned { reason })
            }
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        None,
                        correlation_id,
                        "router.orphan_record_failed",
                        AuditCategory::Persistence,
                        "event-router",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(EngineError::StoreUnavailable(error.to_string()))
            }
        }
    }
}

/// Ingress hand-off from the mailbox runner. A routing error leaves the
/// envelope unacknowledged so the gateway redelivers it.
#[async_trait]
impl InboundSink for EventRouter {
    async fn deliver(
        &self,
        email: InboundEmail,
        context: &DeliveryContext,
    ) -> Result<(), DeliveryError> {
        self.route(email, &context.correlation_id)
            .await
            .map(|_| ())
            .map_err(|error| DeliveryError::new(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use haggler_core::audit::InMemoryAuditSink;
    use haggler_core::{EngineError, NegotiationId, NewOrphanedEvent, OrphanedEvent, SupplierId};
    use haggler_db::repositories::{
        InMemoryOrphanedEventRepository, OrphanedEventRepository, RepositoryError,
    };
    use haggler_mail::envelope::InboundEmail;

    use crate::registry::SessionRegistry;

    use super::{ConversationKey, EventRouter, RoutingDisposition, ThreadIndex};

    struct FailingOrphanRepository;

    #[async_trait]
    impl OrphanedEventRepository for FailingOrphanRepository {
        async fn record(&self, _event: NewOrphanedEvent) -> Result<OrphanedEvent, RepositoryError> {
            Err(RepositoryError::Decode("scripted orphan store outage".to_string()))
        }

        async fn list_recent(&self, _limit: u32) -> Result<Vec<OrphanedEvent>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn email(from_address: &str, thread_key: Option<&str>) -> InboundEmail {
        InboundEmail {
            message_id: "msg-1".to_string(),
            thread_key: thread_key.map(str::to_string),
            from_address: from_address.to_string(),
            subject: Some("Re: bulk pricing".to_string()),
            body: "We can do $95 per unit.".to_string(),
            received_at: Utc::now(),
        }
    }

    fn key(negotiation: &str, supplier: &str) -> ConversationKey {
        ConversationKey {
            negotiation_id: NegotiationId(negotiation.to_string()),
            supplier_id: SupplierId(supplier.to_string()),
        }
    }

    #[tokio::test]
    async fn thread_index_round_trips_registered_keys() {
        let index = ThreadIndex::default();
        index.register("ref-1", key("neg-1", "acme")).await;
        index.register("ref-2", key("neg-1", "globex")).await;

        assert_eq!(index.resolve("ref-2").await, Some(key("neg-1", "globex")));
        assert_eq!(index.resolve("ref-missing").await, None);
    }

    #[tokio::test]
    async fn evicting_a_negotiation_drops_all_of_its_thread_keys() {
        let index = ThreadIndex::default();
        index.register("ref-1", key("neg-1", "acme")).await;
        index.register("ref-2", key("neg-1", "globex")).await;
        index.register("ref-3", key("neg-2", "acme")).await;

        index.remove_negotiation(&NegotiationId("neg-1".to_string())).await;

        assert_eq!(index.resolve("ref-1").await, None);
        assert_eq!(index.resolve("ref-2").await, None);
        assert_eq!(index.resolve("ref-3").await, Some(key("neg-2", "acme")));
    }

    #[tokio::test]
    async fn unmatched_event_is_recorded_as_orphaned() {
        let orphans = Arc::new(InMemoryOrphanedEventRepository::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let router = EventRouter::new(
            Arc::new(SessionRegistry::default()),
            ThreadIndex::default(),
            Arc::clone(&orphans) as _,
            Arc::clone(&audit) as _,
        );

        let disposition = router
            .route(email("unknown@vendor.example", None), "req-1")
            .await
            .expect("orphan recording should succeed");

        assert!(matches!(
            disposition,
            RoutingDisposition::Orphaned { ref reason } if reason.contains("no active conversation")
        ));
        let recorded = orphans.list_recent(10).await.expect("in-memory list");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].sender_address, "unknown@vendor.example");
        assert!(audit.events().iter().any(|event| event.event_type == "router.event_orphaned"));
    }

    #[tokio::test]
    async fn orphan_store_failure_surfaces_for_redelivery() {
        let router = EventRouter::new(
            Arc::new(SessionRegistry::default()),
            ThreadIndex::default(),
            Arc::new(FailingOrphanRepository),
            Arc::new(InMemoryAuditSink::default()),
        );

        let error = router
            .route(email("unknown@vendor.example", None), "req-2")
            .await
            .expect_err("orphan store outage should propagate");
        assert!(matches!(error, EngineError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn stale_thread_key_is_orphaned_without_address_fallback() {
        let orphans = Arc::new(InMemoryOrphanedEventRepository::default());
        let threads = ThreadIndex::default();
        threads.register("ref-old", key("neg-gone", "acme")).await;
        let router = EventRouter::new(
            Arc::new(SessionRegistry::default()),
            threads,
            Arc::clone(&orphans) as _,
            Arc::new(InMemoryAuditSink::default()),
        );

        let disposition = router
            .route(email("sales@acme-supply.example", Some("ref-old")), "req-3")
            .await
            .expect("orphan recording should succeed");

        assert!(matches!(
            disposition,
            RoutingDisposition::Orphaned { ref reason } if reason.contains("no longer active")
        ));
        let recorded = orphans.list_recent(10).await.expect("in-memory list");
        assert_eq!(recorded[0].thread_key.as_deref(), Some("ref-old"));
    }
}
