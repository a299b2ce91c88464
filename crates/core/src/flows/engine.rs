use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{ConversationEvent, ConversationPhase, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_phase(&self) -> ConversationPhase;
    fn transition(
        &self,
        current: &ConversationPhase,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The one conversation flow: opening send, reply loop, conclusion.
/// Failures never fire an event, so a failed step holds the phase in place.
#[derive(Clone, Debug, Default)]
pub struct SupplierConversationFlow;

impl FlowDefinition for SupplierConversationFlow {
    fn initial_phase(&self) -> ConversationPhase {
        ConversationPhase::AwaitingFirstSend
    }

    fn transition(
        &self,
        current: &ConversationPhase,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_supplier_conversation(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_phase(&self) -> ConversationPhase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: &ConversationPhase,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationPhase,
        event: &ConversationEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.negotiation_id.clone(),
                        audit.supplier_id.clone(),
                        audit.correlation_id.clone(),
                        "conversation.transition_applied",
                        AuditCategory::Conversation,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.negotiation_id.clone(),
                        audit.supplier_id.clone(),
                        audit.correlation_id.clone(),
                        "conversation.transition_rejected",
                        AuditCategory::Conversation,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<SupplierConversationFlow> {
    fn default() -> Self {
        Self::new(SupplierConversationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: ConversationPhase, event: ConversationEvent },
}

fn transition_supplier_conversation(
    current: &ConversationPhase,
    event: &ConversationEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationEvent::{
        CancelRequested, InboundAccepted, OpeningDispatched, ReplyDispatched, TerminalSignal,
    };
    use ConversationPhase::{AwaitingFirstSend, AwaitingReply, Concluded, ProcessingReply};

    let to = match (current, event) {
        (AwaitingFirstSend, OpeningDispatched) => AwaitingReply,
        (AwaitingReply, InboundAccepted) => ProcessingReply,
        // A pair stranded in processing (failed generation or send) re-enters
        // processing on the next inbound instead of wedging.
        (ProcessingReply, InboundAccepted) => ProcessingReply,
        (ProcessingReply, ReplyDispatched) => AwaitingReply,
        (ProcessingReply, TerminalSignal) => Concluded,
        (Concluded, CancelRequested) => {
            return Err(FlowTransitionError::InvalidTransition { phase: *current, event: *event });
        }
        (_, CancelRequested) => Concluded,
        _ => {
            return Err(FlowTransitionError::InvalidTransition { phase: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::negotiation::{NegotiationId, SupplierId};
    use crate::flows::engine::{
        FlowDefinition, FlowEngine, FlowTransitionError, SupplierConversationFlow,
    };
    use crate::flows::states::{ConversationEvent, ConversationPhase};

    #[test]
    fn full_round_trip_through_reply_loop() {
        let engine = FlowEngine::default();
        let mut phase = engine.initial_phase();

        phase = engine
            .apply(&phase, &ConversationEvent::OpeningDispatched)
            .expect("awaiting_first_send -> awaiting_reply")
            .to;
        phase = engine
            .apply(&phase, &ConversationEvent::InboundAccepted)
            .expect("awaiting_reply -> processing_reply")
            .to;
        phase = engine
            .apply(&phase, &ConversationEvent::ReplyDispatched)
            .expect("processing_reply -> awaiting_reply")
            .to;
        assert_eq!(phase, ConversationPhase::AwaitingReply);

        phase = engine
            .apply(&phase, &ConversationEvent::InboundAccepted)
            .expect("loop back into processing")
            .to;
        let concluded = engine
            .apply(&phase, &ConversationEvent::TerminalSignal)
            .expect("terminal signal concludes");
        assert_eq!(concluded.to, ConversationPhase::Concluded);
        assert!(concluded.to.is_terminal());
    }

    #[test]
    fn stranded_processing_accepts_next_inbound() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&ConversationPhase::ProcessingReply, &ConversationEvent::InboundAccepted)
            .expect("processing_reply self-loop");
        assert_eq!(outcome.to, ConversationPhase::ProcessingReply);
    }

    #[test]
    fn cancel_concludes_every_live_phase() {
        let engine = FlowEngine::default();
        for phase in [
            ConversationPhase::AwaitingFirstSend,
            ConversationPhase::AwaitingReply,
            ConversationPhase::ProcessingReply,
        ] {
            let outcome = engine
                .apply(&phase, &ConversationEvent::CancelRequested)
                .expect("cancel from live phase");
            assert_eq!(outcome.to, ConversationPhase::Concluded);
        }
    }

    #[test]
    fn concluded_is_terminal() {
        let engine = FlowEngine::default();
        for event in [
            ConversationEvent::OpeningDispatched,
            ConversationEvent::InboundAccepted,
            ConversationEvent::ReplyDispatched,
            ConversationEvent::TerminalSignal,
            ConversationEvent::CancelRequested,
        ] {
            let error = engine
                .apply(&ConversationPhase::Concluded, &event)
                .expect_err("concluded accepts no event");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn reply_cannot_dispatch_before_inbound() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&ConversationPhase::AwaitingReply, &ConversationEvent::ReplyDispatched)
            .expect_err("no reply without an accepted inbound");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                phase: ConversationPhase::AwaitingReply,
                event: ConversationEvent::ReplyDispatched
            }
        ));
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let events = [
            ConversationEvent::OpeningDispatched,
            ConversationEvent::InboundAccepted,
            ConversationEvent::ReplyDispatched,
            ConversationEvent::InboundAccepted,
            ConversationEvent::TerminalSignal,
        ];

        let run = |engine: &FlowEngine<SupplierConversationFlow>| {
            let mut phase = engine.initial_phase();
            let mut trail = Vec::new();
            for event in &events {
                let outcome = engine.apply(&phase, event).expect("deterministic run");
                trail.push((outcome.from, outcome.to));
                phase = outcome.to;
            }
            (phase, trail)
        };

        assert_eq!(run(&engine), run(&engine));
        assert_eq!(
            SupplierConversationFlow.initial_phase(),
            ConversationPhase::AwaitingFirstSend
        );
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &ConversationPhase::AwaitingFirstSend,
                &ConversationEvent::OpeningDispatched,
                &sink,
                &AuditContext::new(
                    Some(NegotiationId("neg-9".to_owned())),
                    Some(SupplierId("acme".to_owned())),
                    "req-42",
                    "session",
                ),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "conversation.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("awaiting_reply"));
    }

    #[test]
    fn rejected_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &ConversationPhase::Concluded,
                &ConversationEvent::InboundAccepted,
                &sink,
                &AuditContext::new(
                    Some(NegotiationId("neg-9".to_owned())),
                    Some(SupplierId("acme".to_owned())),
                    "req-43",
                    "session",
                ),
            )
            .expect_err("concluded accepts no inbound");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "conversation.transition_rejected");
    }
}
