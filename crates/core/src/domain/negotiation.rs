use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NegotiationId(pub String);

impl NegotiationId {
    /// Caller-visible opaque token. UUID-backed so duplicate start requests
    /// always produce distinct negotiations.
    pub fn generate() -> Self {
        Self(format!("neg-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupplierId(pub String);

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One procurement negotiation spanning multiple suppliers. Rows are never
/// deleted; status moves forward only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: NegotiationId,
    pub product: String,
    pub strategy: String,
    pub tactics: String,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn new(
        product: impl Into<String>,
        strategy: impl Into<String>,
        tactics: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NegotiationId::generate(),
            product: product.into(),
            strategy: strategy.into(),
            tactics: tactics.into(),
            status: NegotiationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: NegotiationStatus) -> bool {
        matches!(
            (&self.status, next),
            (NegotiationStatus::Pending, NegotiationStatus::Active)
                | (NegotiationStatus::Pending, NegotiationStatus::Failed)
                | (NegotiationStatus::Active, NegotiationStatus::Completed)
                | (NegotiationStatus::Active, NegotiationStatus::Failed)
        )
    }

    pub fn transition_to(&mut self, next: NegotiationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: self.status, to: next })
    }
}

/// One supplier named in a start request: identity, reply-to address, and
/// optional free-text insight fed to the negotiator prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierSpec {
    pub id: SupplierId,
    pub address: String,
    pub insights: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub product: String,
    pub strategy: String,
    pub tactics: String,
    pub suppliers: Vec<SupplierSpec>,
}

impl NegotiationRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.product.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "negotiation request requires a product description".to_string(),
            ));
        }
        if self.suppliers.is_empty() {
            return Err(DomainError::InvariantViolation(
                "negotiation request requires at least one supplier".to_string(),
            ));
        }

        for (index, supplier) in self.suppliers.iter().enumerate() {
            if supplier.id.0.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "supplier at position {index} has an empty id"
                )));
            }
            if !supplier.address.contains('@') {
                return Err(DomainError::InvariantViolation(format!(
                    "supplier `{}` has an invalid address `{}`",
                    supplier.id, supplier.address
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for supplier in &self.suppliers {
            if !seen.insert(&supplier.id) {
                return Err(DomainError::InvariantViolation(format!(
                    "supplier `{}` appears more than once",
                    supplier.id
                )));
            }
        }

        Ok(())
    }
}
