use thiserror::Error;

use crate::domain::negotiation::{NegotiationId, NegotiationStatus, SupplierId};
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid negotiation transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: NegotiationStatus, to: NegotiationStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure taxonomy for engine operations. The recoverable variants double
/// as the conversation's recorded last failure, so status reports carry
/// them typed. Unroutable or ambiguous events are not errors; the router
/// records them as orphaned events or ambiguity audit metadata instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("completion service unavailable: {reason}")]
    GenerationUnavailable { reason: String },
    #[error("mail channel unavailable: {reason}")]
    ChannelUnavailable { reason: String },
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("unknown negotiation `{0}`")]
    UnknownNegotiation(NegotiationId),
    #[error("negotiation `{negotiation_id}` has no supplier `{supplier_id}`")]
    UnknownSupplier { negotiation_id: NegotiationId, supplier_id: SupplierId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested negotiation or supplier does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl EngineError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<EngineError> for InterfaceError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            EngineError::UnknownNegotiation(id) => Self::NotFound {
                message: format!("negotiation `{id}` not found"),
                correlation_id: "unassigned".to_owned(),
            },
            EngineError::UnknownSupplier { negotiation_id, supplier_id } => Self::NotFound {
                message: format!(
                    "supplier `{supplier_id}` not part of negotiation `{negotiation_id}`"
                ),
                correlation_id: "unassigned".to_owned(),
            },
            EngineError::GenerationUnavailable { reason } => Self::ServiceUnavailable {
                message: reason,
                correlation_id: "unassigned".to_owned(),
            },
            EngineError::ChannelUnavailable { reason } => Self::ServiceUnavailable {
                message: reason,
                correlation_id: "unassigned".to_owned(),
            },
            EngineError::StoreUnavailable(message) => Self::ServiceUnavailable {
                message,
                correlation_id: "unassigned".to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::negotiation::NegotiationId;
    use crate::errors::{DomainError, EngineError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = EngineError::from(DomainError::InvariantViolation(
            "duplicate supplier".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface = EngineError::from(DomainError::InvariantViolation(
            "duplicate supplier".to_owned(),
        ))
        .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn unknown_negotiation_maps_to_not_found() {
        let interface =
            EngineError::UnknownNegotiation(NegotiationId("neg-missing".to_owned()))
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.user_message(), "The requested negotiation or supplier does not exist.");
    }

    #[test]
    fn recoverable_failures_map_to_service_unavailable() {
        let generation = EngineError::GenerationUnavailable {
            reason: "completion timed out after 30s".to_owned(),
        }
        .into_interface("req-4");
        let store =
            EngineError::StoreUnavailable("database lock timeout".to_owned()).into_interface("req-5");

        assert!(matches!(generation, InterfaceError::ServiceUnavailable { .. }));
        assert!(matches!(store, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            store.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
