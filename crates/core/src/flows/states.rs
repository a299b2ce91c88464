use serde::{Deserialize, Serialize};

/// Phase of one (negotiation, supplier) conversation. `Concluded` is
/// terminal: later inbound messages are stored for audit but never answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    AwaitingFirstSend,
    AwaitingReply,
    ProcessingReply,
    Concluded,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingFirstSend => "awaiting_first_send",
            Self::AwaitingReply => "awaiting_reply",
            Self::ProcessingReply => "processing_reply",
            Self::Concluded => "concluded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Concluded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEvent {
    OpeningDispatched,
    InboundAccepted,
    ReplyDispatched,
    TerminalSignal,
    CancelRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationPhase,
    pub to: ConversationPhase,
    pub event: ConversationEvent,
}
