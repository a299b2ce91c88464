//! Core domain for haggler: negotiation lifecycle, per-supplier conversation
//! state machine, configuration, error taxonomy, and the audit trail.
//!
//! Nothing in this crate performs I/O. The engine, store, and transport
//! crates build on these types; external collaborators (completion service,
//! mail channel, durable store) are reached only through traits defined in
//! those crates.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::binding::{AgentBinding, AgentRole, SupplierContact};
pub use domain::message::{Message, MessageDirection, NewMessage};
pub use domain::negotiation::{
    Negotiation, NegotiationId, NegotiationRequest, NegotiationStatus, SupplierId, SupplierSpec,
};
pub use domain::orphan::{NewOrphanedEvent, OrphanedEvent};
pub use errors::{DomainError, EngineError, InterfaceError};
pub use flows::{
    ConversationEvent, ConversationPhase, FlowEngine, FlowTransitionError,
    SupplierConversationFlow, TransitionOutcome,
};
