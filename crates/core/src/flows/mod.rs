pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, SupplierConversationFlow};
pub use states::{ConversationEvent, ConversationPhase, TransitionOutcome};
