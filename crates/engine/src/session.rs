//! One negotiation's live session.
//!
//! A session owns the negotiator agents, the shared orchestrator, and one
//! worker task per supplier conversation. Inbound events are admitted
//! durably at enqueue time: the row is appended before the event enters the
//! worker queue, so an admission that fails never looks accepted to the
//! caller. The worker consumes the ordered queue, so everything else that
//! touches a conversation (opening send, reply generation, outbound
//! appends) runs inside a per-pair exclusive region; conversations for
//! different suppliers proceed concurrently. Cancellation bypasses the
//! queues and concludes the state cells directly; a worker mid-flight
//! notices on return and discards its result.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use haggler_agent::conclusion::ConclusionPolicy;
use haggler_agent::negotiator::NegotiatorAgent;
use haggler_agent::orchestrator::OrchestratorAgent;
use haggler_agent::prompts::ConversationSummary;
use haggler_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use haggler_core::{
    AgentBinding, ConversationEvent, ConversationPhase, EngineError, FlowEngine, Message,
    MessageDirection, Negotiation, NegotiationId, NegotiationStatus, NewMessage,
    SupplierConversationFlow, SupplierId,
};
use haggler_db::repositories::{MessageRepository, NegotiationRepository};
use haggler_mail::mailer::Mailer;

use crate::registry::SessionRegistry;
use crate::router::{ConversationKey, ThreadIndex};
use crate::service::{EngineDeps, EngineOptions};

/// One inbound event resolved by the router, offered to the owning
/// conversation for admission. The session appends the row and queues the
/// stored message; admission order is the arrival order the store records.
#[derive(Debug)]
pub(crate) struct InboundWork {
    pub(crate) body: String,
    pub(crate) received_at: DateTime<Utc>,
    pub(crate) correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    UnknownSupplier,
    WorkerStopped,
    /// The inbound row could not be appended. The event was never admitted;
    /// callers keep the transport envelope unacknowledged for redelivery.
    StoreUnavailable(String),
}

enum WorkItem {
    Opening { done: oneshot::Sender<()> },
    Inbound { message: Message, correlation_id: String },
}

/// Point-in-time view of one conversation, for status queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub supplier_id: SupplierId,
    pub phase: ConversationPhase,
    pub last_error: Option<EngineError>,
}

struct ConversationState {
    phase: ConversationPhase,
    last_error: Option<EngineError>,
}

struct ConversationRuntime {
    address: String,
    queue: mpsc::UnboundedSender<WorkItem>,
    // Serializes append-then-enqueue, so store sequence order matches queue
    // order for this conversation.
    admission: Mutex<()>,
    state: Arc<RwLock<ConversationState>>,
}

/// Context every conversation worker shares: collaborators, the sibling
/// state cells for cross-supplier summaries, and the negotiation identity.
struct SessionShared {
    negotiation_id: NegotiationId,
    subject: String,
    orchestrator: OrchestratorAgent,
    negotiations: Arc<dyn NegotiationRepository>,
    messages: Arc<dyn MessageRepository>,
    audit: Arc<dyn AuditSink>,
    mailer: Arc<dyn Mailer>,
    conclusion: Arc<dyn ConclusionPolicy>,
    threads: ThreadIndex,
    registry: Weak<SessionRegistry>,
    flow: FlowEngine<SupplierConversationFlow>,
    options: EngineOptions,
    states: HashMap<SupplierId, Arc<RwLock<ConversationState>>>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl SessionShared {
    async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    fn audit_context(&self, supplier_id: &SupplierId, correlation_id: &str) -> AuditContext {
        AuditContext::new(
            Some(self.negotiation_id.clone()),
            Some(supplier_id.clone()),
            correlation_id,
            "session",
        )
    }

    fn emit_audit(
        &self,
        supplier_id: Option<&SupplierId>,
        correlation_id: &str,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let mut event = AuditEvent::new(
            Some(self.negotiation_id.clone()),
            supplier_id.cloned(),
            correlation_id,
            event_type,
            category,
            "session",
            outcome,
        );
        for (key, value) in metadata {
            event = event.with_metadata(*key, value.clone());
        }
        self.audit.emit(event);
    }
}

pub struct NegotiationSession {
    negotiation_id: NegotiationId,
    conversations: HashMap<SupplierId, ConversationRuntime>,
    shared: Arc<SessionShared>,
}

impl NegotiationSession {
    /// Builds the full agent set and spawns one worker per supplier. The
    /// session only becomes routable when the caller registers it, so no
    /// event can reach a partially built session.
    pub(crate) fn build(
        negotiation: &Negotiation,
        bindings: &[AgentBinding],
        deps: &EngineDeps,
        options: EngineOptions,
        threads: ThreadIndex,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let flow = FlowEngine::default();
        let initial_phase = flow.initial_phase();

        let orchestrator_instructions = bindings
            .iter()
            .find_map(|binding| match binding {
                AgentBinding::Orchestrator { instructions, .. } => Some(instructions.clone()),
                AgentBinding::Negotiator { .. } => None,
            })
            .unwrap_or_default();
        let orchestrator = OrchestratorAgent::new(
            orchestrator_instructions,
            options.completion,
            Arc::clone(&deps.completion),
        );

        let mut states = HashMap::new();
        let mut conversations = HashMap::new();
        let mut workers = Vec::new();
        for binding in bindings {
            let AgentBinding::Negotiator { contact, instructions, .. } = binding else {
                continue;
            };
            let state = Arc::new(RwLock::new(ConversationState {
                phase: initial_phase,
                last_error: None,
            }));
            let (queue, inbox) = mpsc::unbounded_channel();
            let agent = NegotiatorAgent::new(
                contact.supplier_id.clone(),
                instructions.clone(),
                options.completion,
                Arc::clone(&deps.completion),
            );
            states.insert(contact.supplier_id.clone(), Arc::clone(&state));
            conversations.insert(
                contact.supplier_id.clone(),
                ConversationRuntime {
                    address: contact.address.clone(),
                    queue,
                    admission: Mutex::new(()),
                    state: Arc::clone(&state),
                },
            );
            workers.push((agent, contact.address.clone(), state, inbox));
        }

        let shared = Arc::new(SessionShared {
            negotiation_id: negotiation.id.clone(),
            subject: format!("Inquiry: {}", negotiation.product),
            orchestrator,
            negotiations: Arc::clone(&deps.negotiations),
            messages: Arc::clone(&deps.messages),
            audit: Arc::clone(&deps.audit),
            mailer: Arc::clone(&deps.mailer),
            conclusion: Arc::clone(&deps.conclusion),
            threads,
            registry,
            flow,
            options,
            states,
            last_activity: RwLock::new(Utc::now()),
        });

        for (agent, address, state, inbox) in workers {
            tokio::spawn(conversation_worker(Arc::clone(&shared), agent, address, state, inbox));
        }

        Arc::new(Self { negotiation_id: negotiation.id.clone(), conversations, shared })
    }

    pub fn negotiation_id(&self) -> &NegotiationId {
        &self.negotiation_id
    }

    /// Supplier bound to `address`, compared case-insensitively.
    pub(crate) fn supplier_for_address(&self, address: &str) -> Option<SupplierId> {
        self.conversations
            .iter()
            .find(|(_, runtime)| runtime.address.eq_ignore_ascii_case(address))
            .map(|(supplier_id, _)| supplier_id.clone())
    }

    pub(crate) async fn last_activity(&self) -> DateTime<Utc> {
        *self.shared.last_activity.read().await
    }

    /// Admits one inbound event: appends the row, then queues the stored
    /// message for the conversation worker. A failed append is reported as
    /// `StoreUnavailable` with nothing queued, so the event stays with the
    /// transport for redelivery.
    pub(crate) async fn enqueue_inbound(
        &self,
        supplier_id: &SupplierId,
        work: InboundWork,
    ) -> Result<(), EnqueueError> {
        let Some(runtime) = self.conversations.get(supplier_id) else {
            return Err(EnqueueError::UnknownSupplier);
        };
        if runtime.queue.is_closed() {
            return Err(EnqueueError::WorkerStopped);
        }

        let _admission = runtime.admission.lock().await;
        let inbound = NewMessage::inbound(
            self.negotiation_id.clone(),
            supplier_id.clone(),
            work.body,
            work.received_at,
        );
        let message = match self.shared.messages.append(inbound).await {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    event_name = "session.inbound_append_failed",
                    negotiation_id = %self.negotiation_id,
                    supplier_id = %supplier_id,
                    error = %error,
                    "inbound message could not be recorded; held for redelivery"
                );
                self.shared.emit_audit(
                    Some(supplier_id),
                    &work.correlation_id,
                    "session.inbound_append_failed",
                    AuditCategory::Persistence,
                    AuditOutcome::Failed,
                    &[("error", error.to_string())],
                );
                let reason = error.to_string();
                set_error(&runtime.state, EngineError::StoreUnavailable(reason.clone())).await;
                return Err(EnqueueError::StoreUnavailable(reason));
            }
        };
        runtime
            .queue
            .send(WorkItem::Inbound { message, correlation_id: work.correlation_id })
            .map_err(|_| EnqueueError::WorkerStopped)?;
        self.shared.touch().await;
        Ok(())
    }

    /// Dispatches an opening message for every conversation still awaiting
    /// its first send, concurrently across suppliers, and waits for the
    /// fan-out to finish. Conversations already past their opening (or
    /// concluded) are left alone, so a retry touches only failed ones.
    pub(crate) async fn start(&self) {
        let mut pending = Vec::new();
        for runtime in self.conversations.values() {
            if runtime.state.read().await.phase != ConversationPhase::AwaitingFirstSend {
                continue;
            }
            let (done, waiter) = oneshot::channel();
            if runtime.queue.send(WorkItem::Opening { done }).is_ok() {
                pending.push(waiter);
            }
        }
        for waiter in pending {
            // A dropped sender means the worker stopped; nothing to wait for.
            let _ = waiter.await;
        }
    }

    /// Concludes every live conversation immediately. In-flight completion
    /// calls are not aborted; their results are discarded on return.
    pub(crate) async fn cancel(&self, correlation_id: &str) -> usize {
        let mut concluded = 0;
        for (supplier_id, runtime) in &self.conversations {
            let mut guard = runtime.state.write().await;
            if guard.phase.is_terminal() {
                continue;
            }
            let audit = self.shared.audit_context(supplier_id, correlation_id);
            match self.shared.flow.apply_with_audit(
                &guard.phase,
                &ConversationEvent::CancelRequested,
                &*self.shared.audit,
                &audit,
            ) {
                Ok(outcome) => {
                    guard.phase = outcome.to;
                    concluded += 1;
                }
                Err(error) => {
                    warn!(
                        event_name = "session.cancel_rejected",
                        negotiation_id = %self.negotiation_id,
                        supplier_id = %supplier_id,
                        error = %error,
                        "conversation refused cancellation"
                    );
                }
            }
        }
        info!(
            event_name = "session.negotiation_cancelled",
            negotiation_id = %self.negotiation_id,
            concluded,
            "cancel concluded live conversations"
        );
        concluded
    }

    pub(crate) async fn snapshot(&self) -> Vec<ConversationSnapshot> {
        let mut snapshots = Vec::with_capacity(self.conversations.len());
        for (supplier_id, runtime) in &self.conversations {
            let state = runtime.state.read().await;
            snapshots.push(ConversationSnapshot {
                supplier_id: supplier_id.clone(),
                phase: state.phase,
                last_error: state.last_error.clone(),
            });
        }
        snapshots.sort_by(|a, b| a.supplier_id.0.cmp(&b.supplier_id.0));
        snapshots
    }
}

async fn conversation_worker(
    shared: Arc<SessionShared>,
    agent: NegotiatorAgent,
    address: String,
    state: Arc<RwLock<ConversationState>>,
    mut inbox: mpsc::UnboundedReceiver<WorkItem>,
) {
    while let Some(item) = inbox.recv().await {
        match item {
            WorkItem::Opening { done } => {
                open_conversation(&shared, &agent, &address, &state).await;
                let _ = done.send(());
            }
            WorkItem::Inbound { message, correlation_id } => {
                process_inbound(&shared, &agent, &address, &state, message, &correlation_id).await;
            }
        }
    }
    debug!(
        event_name = "session.worker_stopped",
        negotiation_id = %shared.negotiation_id,
        supplier_id = %agent.supplier_id(),
        "conversation worker drained and stopped"
    );
}

async fn open_conversation(
    shared: &SessionShared,
    agent: &NegotiatorAgent,
    address: &str,
    state: &RwLock<ConversationState>,
) {
    if state.read().await.phase != ConversationPhase::AwaitingFirstSend {
        return;
    }
    let supplier_id = agent.supplier_id().clone();
    let correlation_id = format!("open-{}", Uuid::new_v4().simple());
    let audit = shared.audit_context(&supplier_id, &correlation_id);

    let opening = match agent.opening_message().await {
        Ok(opening) => opening,
        Err(error) => {
            warn!(
                event_name = "session.opening_generation_failed",
                negotiation_id = %shared.negotiation_id,
                supplier_id = %supplier_id,
                error = %error,
                "opening generation failed; conversation stays unstarted"
            );
            shared.emit_audit(
                Some(&supplier_id),
                &correlation_id,
                "session.opening_generation_failed",
                AuditCategory::Generation,
                AuditOutcome::Failed,
                &[("error", error.to_string())],
            );
            set_error(state, EngineError::GenerationUnavailable { reason: error.to_string() })
                .await;
            return;
        }
    };

    dispatch_outbound(
        shared,
        &supplier_id,
        address,
        opening,
        state,
        &audit,
        ConversationEvent::OpeningDispatched,
    )
    .await;
}

/// Handles one admitted inbound message. The row is already durable; this
/// runs the reply region: transition, guidance, generation, dispatch.
async fn process_inbound(
    shared: &SessionShared,
    agent: &NegotiatorAgent,
    address: &str,
    state: &RwLock<ConversationState>,
    admitted: Message,
    correlation_id: &str,
) {
    let supplier_id = agent.supplier_id().clone();
    let audit = shared.audit_context(&supplier_id, correlation_id);
    shared.touch().await;

    if state.read().await.phase.is_terminal() {
        // Concluded conversations keep their audit trail but never reply.
        debug!(
            event_name = "session.inbound_after_conclusion",
            negotiation_id = %shared.negotiation_id,
            supplier_id = %supplier_id,
            "inbound stored for concluded conversation"
        );
        shared.emit_audit(
            Some(&supplier_id),
            correlation_id,
            "session.inbound_after_conclusion",
            AuditCategory::Conversation,
            AuditOutcome::Rejected,
            &[],
        );
        return;
    }

    if apply_transition(shared, state, ConversationEvent::InboundAccepted, &audit).await.is_none() {
        // An inbound ahead of our opening send; the row is kept, no reply
        // is owed yet.
        return;
    }

    let guidance = if shared.options.advice_enabled {
        let summaries = conversation_summaries(shared).await;
        shared.orchestrator.advise(&supplier_id, &summaries).await
    } else {
        String::new()
    };

    let history = match shared
        .messages
        .list_for_conversation(&shared.negotiation_id, &supplier_id)
        .await
    {
        // The reply answers the admitted message: rows admitted behind it
        // are left for their own work items, so each queued event produces
        // its own reply from the history it arrived into.
        Ok(history) => history
            .into_iter()
            .filter(|message| message.sequence <= admitted.sequence)
            .collect::<Vec<_>>(),
        Err(error) => {
            warn!(
                event_name = "session.history_load_failed",
                negotiation_id = %shared.negotiation_id,
                supplier_id = %supplier_id,
                error = %error,
                "conversation history unavailable; held for the next inbound"
            );
            set_error(state, EngineError::StoreUnavailable(error.to_string())).await;
            return;
        }
    };

    let Some(reply) = generate_reply(shared, agent, &history, &guidance, state, &audit).await
    else {
        return;
    };

    if state.read().await.phase.is_terminal() {
        debug!(
            event_name = "session.reply_discarded",
            negotiation_id = %shared.negotiation_id,
            supplier_id = %supplier_id,
            "conversation concluded while the reply was in flight"
        );
        return;
    }

    let terminal = shared.conclusion.is_terminal(&reply);
    let success_event = if terminal {
        ConversationEvent::TerminalSignal
    } else {
        ConversationEvent::ReplyDispatched
    };
    let dispatched =
        dispatch_outbound(shared, &supplier_id, address, reply, state, &audit, success_event)
            .await;

    if dispatched && terminal {
        info!(
            event_name = "session.conversation_concluded",
            negotiation_id = %shared.negotiation_id,
            supplier_id = %supplier_id,
            "negotiator signalled conclusion"
        );
        shared.emit_audit(
            Some(&supplier_id),
            correlation_id,
            "session.conversation_concluded",
            AuditCategory::Conversation,
            AuditOutcome::Success,
            &[],
        );
        conclude_if_complete(shared).await;
    }
}

/// Reply generation with a bounded retry. Exhaustion records the failure
/// and holds the conversation in `processing_reply`; the next inbound
/// re-enters processing.
async fn generate_reply(
    shared: &SessionShared,
    agent: &NegotiatorAgent,
    history: &[Message],
    guidance: &str,
    state: &RwLock<ConversationState>,
    audit: &AuditContext,
) -> Option<String> {
    let supplier_id = agent.supplier_id().clone();
    let mut attempt = 0u32;
    loop {
        match agent.reply(history, guidance).await {
            Ok(reply) => return Some(reply),
            Err(error) if attempt < shared.options.generation_retries => {
                attempt += 1;
                debug!(
                    event_name = "session.reply_generation_retry",
                    negotiation_id = %shared.negotiation_id,
                    supplier_id = %supplier_id,
                    attempt,
                    error = %error,
                    "retrying reply generation"
                );
                tokio::time::sleep(shared.options.reply_retry_backoff).await;
            }
            Err(error) => {
                warn!(
                    event_name = "session.reply_generation_failed",
                    negotiation_id = %shared.negotiation_id,
                    supplier_id = %supplier_id,
                    attempts = attempt + 1,
                    error = %error,
                    "reply generation exhausted retries; conversation held in processing"
                );
                shared.emit_audit(
                    Some(&supplier_id),
                    &audit.correlation_id,
                    "session.reply_generation_failed",
                    AuditCategory::Generation,
                    AuditOutcome::Failed,
                    &[
                        ("attempts", (attempt + 1).to_string()),
                        ("error", error.to_string()),
                    ],
                );
                set_error(state, EngineError::GenerationUnavailable { reason: error.to_string() })
                    .await;
                return None;
            }
        }
    }
}

/// Sends one outbound message, records it, and advances the phase. The
/// outbound row is appended even when the channel rejects the send, so
/// history shows every message the system produced. Returns whether the
/// send went out.
async fn dispatch_outbound(
    shared: &SessionShared,
    supplier_id: &SupplierId,
    address: &str,
    body: String,
    state: &RwLock<ConversationState>,
    audit: &AuditContext,
    success_event: ConversationEvent,
) -> bool {
    if state.read().await.phase.is_terminal() {
        debug!(
            event_name = "session.reply_discarded",
            negotiation_id = %shared.negotiation_id,
            supplier_id = %supplier_id,
            "conversation concluded before dispatch"
        );
        return false;
    }

    let mut send_result = shared.mailer.send(address, &shared.subject, &body).await;
    if send_result.is_err() {
        // One bounded retry before declaring the channel unavailable.
        tokio::time::sleep(shared.options.reply_retry_backoff).await;
        send_result = shared.mailer.send(address, &shared.subject, &body).await;
    }

    let outbound = NewMessage::outbound(shared.negotiation_id.clone(), supplier_id.clone(), body);
    match send_result {
        Ok(receipt) => {
            shared
                .threads
                .register(
                    receipt.message_ref.clone(),
                    ConversationKey {
                        negotiation_id: shared.negotiation_id.clone(),
                        supplier_id: supplier_id.clone(),
                    },
                )
                .await;

            match shared.messages.append(outbound).await {
                Ok(_) => clear_error(state).await,
                Err(error) => {
                    warn!(
                        event_name = "session.outbound_append_failed",
                        negotiation_id = %shared.negotiation_id,
                        supplier_id = %supplier_id,
                        error = %error,
                        "sent message could not be recorded"
                    );
                    shared.emit_audit(
                        Some(supplier_id),
                        &audit.correlation_id,
                        "session.outbound_append_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                        &[("error", error.to_string())],
                    );
                    set_error(state, EngineError::StoreUnavailable(error.to_string())).await;
                }
            }
            shared.touch().await;

            let event_type = match success_event {
                ConversationEvent::OpeningDispatched => "session.opening_dispatched",
                _ => "session.reply_dispatched",
            };
            if apply_transition(shared, state, success_event, audit).await.is_some() {
                info!(
                    event_name = event_type,
                    negotiation_id = %shared.negotiation_id,
                    supplier_id = %supplier_id,
                    message_ref = %receipt.message_ref,
                    "outbound message dispatched"
                );
                shared.emit_audit(
                    Some(supplier_id),
                    &audit.correlation_id,
                    event_type,
                    AuditCategory::Outbound,
                    AuditOutcome::Success,
                    &[("message_ref", receipt.message_ref)],
                );
            }
            true
        }
        Err(error) => {
            if let Err(append_error) = shared.messages.append(outbound).await {
                warn!(
                    event_name = "session.outbound_append_failed",
                    negotiation_id = %shared.negotiation_id,
                    supplier_id = %supplier_id,
                    error = %append_error,
                    "attempted message could not be recorded"
                );
            }
            warn!(
                event_name = "session.send_failed",
                negotiation_id = %shared.negotiation_id,
                supplier_id = %supplier_id,
                error = %error,
                "mail channel rejected outbound message"
            );
            shared.emit_audit(
                Some(supplier_id),
                &audit.correlation_id,
                "session.send_failed",
                AuditCategory::Outbound,
                AuditOutcome::Failed,
                &[("error", error.to_string())],
            );
            set_error(state, EngineError::ChannelUnavailable { reason: error.to_string() }).await;
            false
        }
    }
}

/// Applies one flow event under the state write lock, re-validating against
/// the current phase so a cancellation that raced in is respected.
async fn apply_transition(
    shared: &SessionShared,
    state: &RwLock<ConversationState>,
    event: ConversationEvent,
    audit: &AuditContext,
) -> Option<ConversationPhase> {
    let mut guard = state.write().await;
    match shared.flow.apply_with_audit(&guard.phase, &event, &*shared.audit, audit) {
        Ok(outcome) => {
            guard.phase = outcome.to;
            Some(outcome.to)
        }
        Err(error) => {
            debug!(
                event_name = "session.transition_skipped",
                negotiation_id = %shared.negotiation_id,
                supplier_id = ?audit.supplier_id,
                error = %error,
                "conversation refused event"
            );
            None
        }
    }
}

/// Cross-supplier progress for the orchestrator, built from stored history.
async fn conversation_summaries(shared: &SessionShared) -> Vec<ConversationSummary> {
    let mut supplier_ids: Vec<SupplierId> = shared.states.keys().cloned().collect();
    supplier_ids.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summaries = Vec::with_capacity(supplier_ids.len());
    for supplier_id in supplier_ids {
        let Some(state) = shared.states.get(&supplier_id) else {
            continue;
        };
        let concluded = state.read().await.phase.is_terminal();
        let history = shared
            .messages
            .list_for_conversation(&shared.negotiation_id, &supplier_id)
            .await
            .unwrap_or_else(|error| {
                debug!(
                    event_name = "session.summary_degraded",
                    negotiation_id = %shared.negotiation_id,
                    supplier_id = %supplier_id,
                    error = %error,
                    "history unavailable for summary"
                );
                Vec::new()
            });
        let last_inbound = history
            .iter()
            .rev()
            .find(|message| message.direction == MessageDirection::Inbound)
            .map(|message| message.body.clone());
        let last_outbound = history
            .iter()
            .rev()
            .find(|message| message.direction == MessageDirection::Outbound)
            .map(|message| message.body.clone());
        summaries.push(ConversationSummary {
            supplier_id,
            message_count: history.len(),
            concluded,
            last_inbound,
            last_outbound,
        });
    }
    summaries
}

/// Once every conversation is terminal, marks the negotiation completed
/// (unless a cancellation already set a terminal status) and evicts the
/// session.
async fn conclude_if_complete(shared: &SessionShared) {
    for state in shared.states.values() {
        if !state.read().await.phase.is_terminal() {
            return;
        }
    }

    let correlation_id = format!("complete-{}", Uuid::new_v4().simple());
    match shared.negotiations.find_by_id(&shared.negotiation_id).await {
        Ok(Some(negotiation)) if negotiation.status == NegotiationStatus::Active => {
            if let Err(error) = shared
                .negotiations
                .update_status(&shared.negotiation_id, NegotiationStatus::Completed, Utc::now())
                .await
            {
                warn!(
                    event_name = "session.completion_persist_failed",
                    negotiation_id = %shared.negotiation_id,
                    error = %error,
                    "all conversations concluded but the terminal status could not be stored"
                );
                shared.emit_audit(
                    None,
                    &correlation_id,
                    "session.completion_persist_failed",
                    AuditCategory::Persistence,
                    AuditOutcome::Failed,
                    &[("error", error.to_string())],
                );
                // Stay registered so the negotiation remains visible as live.
                return;
            }
            info!(
                event_name = "session.negotiation_completed",
                negotiation_id = %shared.negotiation_id,
                "all conversations concluded; negotiation completed"
            );
            shared.emit_audit(
                None,
                &correlation_id,
                "session.negotiation_completed",
                AuditCategory::System,
                AuditOutcome::Success,
                &[],
            );
        }
        Ok(_) => {}
        Err(error) => {
            warn!(
                event_name = "session.completion_persist_failed",
                negotiation_id = %shared.negotiation_id,
                error = %error,
                "negotiation row unavailable while concluding"
            );
            return;
        }
    }

    if let Some(registry) = shared.registry.upgrade() {
        registry.evict(&shared.negotiation_id).await;
    }
    shared.threads.remove_negotiation(&shared.negotiation_id).await;
}

async fn set_error(state: &RwLock<ConversationState>, error: EngineError) {
    state.write().await.last_error = Some(error);
}

async fn clear_error(state: &RwLock<ConversationState>) {
    state.write().await.last_error = None;
}
