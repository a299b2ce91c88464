pub mod binding;
pub mod message;
pub mod negotiation;
pub mod orphan;

pub use binding::{AgentBinding, AgentRole, SupplierContact};
pub use message::{Message, MessageDirection, NewMessage};
pub use negotiation::{
    Negotiation, NegotiationId, NegotiationRequest, NegotiationStatus, SupplierId, SupplierSpec,
};
pub use orphan::{NewOrphanedEvent, OrphanedEvent};
