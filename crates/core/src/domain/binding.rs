use serde::{Deserialize, Serialize};

use crate::domain::negotiation::{NegotiationId, SupplierId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Negotiator,
    Orchestrator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiator => "negotiator",
            Self::Orchestrator => "orchestrator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "negotiator" => Some(Self::Negotiator),
            "orchestrator" => Some(Self::Orchestrator),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierContact {
    pub supplier_id: SupplierId,
    pub address: String,
    pub insights: Option<String>,
}

/// Immutable wiring record for one agent in a negotiation. The variant is
/// the capability set: negotiators compose openings and replies for one
/// supplier, the orchestrator only advises.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AgentBinding {
    Negotiator {
        negotiation_id: NegotiationId,
        contact: SupplierContact,
        instructions: String,
    },
    Orchestrator {
        negotiation_id: NegotiationId,
        instructions: String,
    },
}

impl AgentBinding {
    pub fn role(&self) -> AgentRole {
        match self {
            Self::Negotiator { .. } => AgentRole::Negotiator,
            Self::Orchestrator { .. } => AgentRole::Orchestrator,
        }
    }

    pub fn negotiation_id(&self) -> &NegotiationId {
        match self {
            Self::Negotiator { negotiation_id, .. } | Self::Orchestrator { negotiation_id, .. } => {
                negotiation_id
            }
        }
    }

    pub fn instructions(&self) -> &str {
        match self {
            Self::Negotiator { instructions, .. } | Self::Orchestrator { instructions, .. } => {
                instructions
            }
        }
    }

    pub fn contact(&self) -> Option<&SupplierContact> {
        match self {
            Self::Negotiator { contact, .. } => Some(contact),
            Self::Orchestrator { .. } => None,
        }
    }

    pub fn supplier_id(&self) -> Option<&SupplierId> {
        self.contact().map(|contact| &contact.supplier_id)
    }
}
