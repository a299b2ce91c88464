//! The negotiation engine facade.
//!
//! [`NegotiationEngine`] is the one entry point interfaces call: start a
//! negotiation, query status and transcripts, cancel, and hand inbound
//! events to the router. It owns the session registry and thread index, so
//! everything reachable from an HTTP handler or the mailbox runner goes
//! through here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use haggler_agent::conclusion::ConclusionPolicy;
use haggler_agent::llm::{CompletionClient, CompletionSettings};
use haggler_agent::prompts::{self, NegotiationBrief};
use haggler_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use haggler_core::config::AppConfig;
use haggler_core::{
    AgentBinding, ConversationPhase, DomainError, EngineError, Message, Negotiation,
    NegotiationId, NegotiationRequest, NegotiationStatus, SupplierContact, SupplierId,
};
use haggler_db::repositories::{
    MessageRepository, NegotiationRepository, OrphanedEventRepository, RepositoryError,
};
use haggler_mail::envelope::InboundEmail;
use haggler_mail::mailer::Mailer;

use crate::registry::SessionRegistry;
use crate::router::{EventRouter, RoutingDisposition, ThreadIndex};
use crate::session::NegotiationSession;

/// Collaborators the engine and its sessions share. All trait objects, so
/// tests wire in-memory doubles and production wires SQLite, the completion
/// gateway, and the mail relay.
#[derive(Clone)]
pub struct EngineDeps {
    pub negotiations: Arc<dyn NegotiationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub orphans: Arc<dyn OrphanedEventRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub completion: Arc<dyn CompletionClient>,
    pub mailer: Arc<dyn Mailer>,
    pub conclusion: Arc<dyn ConclusionPolicy>,
}

/// Tunables threaded into every session.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub completion: CompletionSettings,
    pub generation_retries: u32,
    pub reply_retry_backoff: Duration,
    pub advice_enabled: bool,
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            completion: CompletionSettings {
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
            },
            generation_retries: config.llm.max_retries,
            reply_retry_backoff: Duration::from_millis(config.engine.reply_retry_backoff_ms),
            advice_enabled: config.engine.advice_enabled,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartReceipt {
    pub negotiation_id: NegotiationId,
    pub status: NegotiationStatus,
}

/// One conversation in a status report. `phase` is `None` when the
/// negotiation is live but this process holds no session for it, which
/// happens after a restart. `last_error` carries the most recent
/// recoverable failure; it clears on the next successful dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationStatus {
    pub supplier_id: SupplierId,
    pub phase: Option<ConversationPhase>,
    pub message_count: i64,
    pub last_error: Option<EngineError>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub negotiation: Negotiation,
    pub conversations: Vec<ConversationStatus>,
}

pub struct NegotiationEngine {
    deps: EngineDeps,
    options: EngineOptions,
    registry: Arc<SessionRegistry>,
    threads: ThreadIndex,
    router: Arc<EventRouter>,
}

impl NegotiationEngine {
    pub fn new(deps: EngineDeps, options: EngineOptions) -> Self {
        let registry = Arc::new(SessionRegistry::default());
        let threads = ThreadIndex::default();
        let router = Arc::new(EventRouter::new(
            Arc::clone(&registry),
            threads.clone(),
            Arc::clone(&deps.orphans),
            Arc::clone(&deps.audit),
        ));
        Self { deps, options, registry, threads, router }
    }

    /// Ingress sink for the mailbox runner; implements
    /// [`haggler_mail::runner::InboundSink`].
    pub fn router(&self) -> Arc<EventRouter> {
        Arc::clone(&self.router)
    }

    /// Validates the request, persists the negotiation with its agent
    /// bindings, builds the live session, and dispatches opening messages
    /// to every supplier concurrently. Returns once the fan-out settles;
    /// per-conversation outcomes land in the status report.
    pub async fn start(&self, request: NegotiationRequest) -> Result<StartReceipt, EngineError> {
        request.validate()?;

        let negotiation =
            Negotiation::new(request.product.clone(), request.strategy.clone(), request.tactics.clone());
        let brief = NegotiationBrief {
            product: &request.product,
            strategy: &request.strategy,
            tactics: &request.tactics,
        };

        let mut bindings = Vec::with_capacity(request.suppliers.len() + 1);
        for supplier in &request.suppliers {
            bindings.push(AgentBinding::Negotiator {
                negotiation_id: negotiation.id.clone(),
                contact: SupplierContact {
                    supplier_id: supplier.id.clone(),
                    address: supplier.address.clone(),
                    insights: supplier.insights.clone(),
                },
                instructions: prompts::negotiator_instructions(
                    brief,
                    supplier.insights.as_deref(),
                ),
            });
        }
        bindings.push(AgentBinding::Orchestrator {
            negotiation_id: negotiation.id.clone(),
            instructions: prompts::orchestrator_instructions(brief),
        });

        self.deps
            .negotiations
            .insert(negotiation.clone(), bindings.clone())
            .await
            .map_err(store_error)?;

        // The session is fully built before it becomes visible to the
        // router; no event can reach a half-wired negotiation.
        let session = NegotiationSession::build(
            &negotiation,
            &bindings,
            &self.deps,
            self.options.clone(),
            self.threads.clone(),
            Arc::downgrade(&self.registry),
        );
        self.registry.insert(Arc::clone(&session)).await;

        if let Err(error) = self
            .deps
            .negotiations
            .update_status(&negotiation.id, NegotiationStatus::Active, Utc::now())
            .await
        {
            warn!(
                event_name = "engine.activation_failed",
                negotiation_id = %negotiation.id,
                error = %error,
                "activation could not be stored; marking negotiation failed"
            );
            self.registry.evict(&negotiation.id).await;
            let _ = self
                .deps
                .negotiations
                .update_status(&negotiation.id, NegotiationStatus::Failed, Utc::now())
                .await;
            return Err(store_error(error));
        }

        session.start().await;

        info!(
            event_name = "engine.negotiation_started",
            negotiation_id = %negotiation.id,
            suppliers = request.suppliers.len(),
            "negotiation started"
        );
        self.deps.audit.emit(
            AuditEvent::new(
                Some(negotiation.id.clone()),
                None,
                format!("start-{}", Uuid::new_v4().simple()),
                "engine.negotiation_started",
                AuditCategory::System,
                "engine",
                AuditOutcome::Success,
            )
            .with_metadata("suppliers", request.suppliers.len().to_string()),
        );

        Ok(StartReceipt { negotiation_id: negotiation.id, status: NegotiationStatus::Active })
    }

    /// Negotiation status with one row per supplier conversation.
    pub async fn status(&self, id: &NegotiationId) -> Result<StatusReport, EngineError> {
        let negotiation = self.find(id).await?;
        let bindings = self.deps.negotiations.bindings_for(id).await.map_err(store_error)?;

        let mut counts: HashMap<SupplierId, i64> = self
            .deps
            .messages
            .count_by_supplier(id)
            .await
            .map_err(store_error)?
            .into_iter()
            .collect();

        let live_phases: HashMap<SupplierId, (ConversationPhase, Option<EngineError>)> =
            match self.registry.get(id).await {
                Some(session) => session
                    .snapshot()
                    .await
                    .into_iter()
                    .map(|snapshot| {
                        (snapshot.supplier_id, (snapshot.phase, snapshot.last_error))
                    })
                    .collect(),
                None => HashMap::new(),
            };

        let mut conversations = Vec::new();
        for binding in &bindings {
            let Some(contact) = binding.contact() else {
                continue;
            };
            let (phase, last_error) = match live_phases.get(&contact.supplier_id) {
                Some((phase, last_error)) => (Some(*phase), last_error.clone()),
                // A terminal negotiation has no live session; its
                // conversations are concluded by definition. A live row
                // without a session means this process cannot see the
                // phase.
                None if negotiation.status.is_terminal() => {
                    (Some(ConversationPhase::Concluded), None)
                }
                None => (None, None),
            };
            conversations.push(ConversationStatus {
                supplier_id: contact.supplier_id.clone(),
                phase,
                message_count: counts.remove(&contact.supplier_id).unwrap_or(0),
                last_error,
            });
        }
        conversations.sort_by(|a, b| a.supplier_id.0.cmp(&b.supplier_id.0));

        Ok(StatusReport { negotiation, conversations })
    }

    /// Full transcript for one supplier conversation, in order.
    pub async fn conversation(
        &self,
        id: &NegotiationId,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Message>, EngineError> {
        self.find(id).await?;
        let bindings = self.deps.negotiations.bindings_for(id).await.map_err(store_error)?;
        let bound = bindings.iter().any(|binding| binding.supplier_id() == Some(supplier_id));
        if !bound {
            return Err(EngineError::UnknownSupplier {
                negotiation_id: id.clone(),
                supplier_id: supplier_id.clone(),
            });
        }

        self.deps.messages.list_for_conversation(id, supplier_id).await.map_err(store_error)
    }

    pub async fn list(&self) -> Result<Vec<Negotiation>, EngineError> {
        self.deps.negotiations.list().await.map_err(store_error)
    }

    /// Concludes every live conversation immediately and records `outcome`
    /// on the negotiation. Events arriving afterwards are orphaned.
    pub async fn cancel(
        &self,
        id: &NegotiationId,
        outcome: NegotiationStatus,
    ) -> Result<StatusReport, EngineError> {
        if !outcome.is_terminal() {
            return Err(EngineError::Domain(DomainError::InvariantViolation(format!(
                "cancel outcome must be terminal, got `{}`",
                outcome.as_str()
            ))));
        }

        let mut negotiation = self.find(id).await?;
        negotiation.transition_to(outcome)?;

        let correlation_id = format!("cancel-{}", Uuid::new_v4().simple());
        if let Some(session) = self.registry.get(id).await {
            session.cancel(&correlation_id).await;
        }

        self.deps
            .negotiations
            .update_status(id, outcome, Utc::now())
            .await
            .map_err(store_error)?;
        self.registry.evict(id).await;
        self.threads.remove_negotiation(id).await;

        info!(
            event_name = "engine.negotiation_cancelled",
            negotiation_id = %id,
            outcome = outcome.as_str(),
            "negotiation cancelled"
        );
        self.deps.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                None,
                correlation_id,
                "engine.negotiation_cancelled",
                AuditCategory::System,
                "engine",
                AuditOutcome::Success,
            )
            .with_metadata("outcome", outcome.as_str()),
        );

        self.status(id).await
    }

    /// Re-dispatches opening messages for conversations still awaiting
    /// their first send, then reports status. Conversations already past
    /// their opening are untouched, so this is safe to repeat until every
    /// supplier has been contacted.
    pub async fn retry_openings(&self, id: &NegotiationId) -> Result<StatusReport, EngineError> {
        self.find(id).await?;
        let Some(session) = self.registry.get(id).await else {
            return Err(EngineError::Domain(DomainError::InvariantViolation(format!(
                "negotiation `{id}` has no live session to retry"
            ))));
        };
        session.start().await;

        info!(
            event_name = "engine.openings_retried",
            negotiation_id = %id,
            "opening retry requested"
        );
        self.status(id).await
    }

    /// Routes one inbound event; used by the HTTP inbound webhook. The
    /// mailbox runner path goes through [`Self::router`] instead.
    pub async fn route_inbound(
        &self,
        email: InboundEmail,
        correlation_id: &str,
    ) -> Result<RoutingDisposition, EngineError> {
        self.router.route(email, correlation_id).await
    }

    async fn find(&self, id: &NegotiationId) -> Result<Negotiation, EngineError> {
        self.deps
            .negotiations
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| EngineError::UnknownNegotiation(id.clone()))
    }
}

fn store_error(error: RepositoryError) -> EngineError {
    EngineError::StoreUnavailable(error.to_string())
}
