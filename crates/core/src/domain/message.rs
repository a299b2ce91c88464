use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::negotiation::{NegotiationId, SupplierId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Outbound,
    Inbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "outbound" => Some(Self::Outbound),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }
}

/// A message accepted for append but not yet sequenced by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub negotiation_id: NegotiationId,
    pub supplier_id: SupplierId,
    pub direction: MessageDirection,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn outbound(
        negotiation_id: NegotiationId,
        supplier_id: SupplierId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            negotiation_id,
            supplier_id,
            direction: MessageDirection::Outbound,
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn inbound(
        negotiation_id: NegotiationId,
        supplier_id: SupplierId,
        body: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            negotiation_id,
            supplier_id,
            direction: MessageDirection::Inbound,
            body: body.into(),
            sent_at: received_at,
        }
    }
}

/// Append-only row in one (negotiation, supplier) conversation. Ordering
/// within a pair is by `sent_at`, then the store-assigned `sequence`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub negotiation_id: NegotiationId,
    pub supplier_id: SupplierId,
    pub direction: MessageDirection,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub sequence: i64,
}

impl Message {
    pub fn from_new(new: NewMessage, sequence: i64) -> Self {
        Self {
            negotiation_id: new.negotiation_id,
            supplier_id: new.supplier_id,
            direction: new.direction,
            body: new.body,
            sent_at: new.sent_at,
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Message, MessageDirection, NewMessage};
    use crate::domain::negotiation::{NegotiationId, SupplierId};

    #[test]
    fn direction_strings_round_trip() {
        assert_eq!(
            MessageDirection::parse(MessageDirection::Outbound.as_str()),
            Some(MessageDirection::Outbound)
        );
        assert_eq!(
            MessageDirection::parse(MessageDirection::Inbound.as_str()),
            Some(MessageDirection::Inbound)
        );
        assert_eq!(MessageDirection::parse("sideways"), None);
    }

    #[test]
    fn sequencing_preserves_payload() {
        let new = NewMessage::inbound(
            NegotiationId("neg-1".to_string()),
            SupplierId("acme".to_string()),
            "we can do 95 per unit",
            Utc::now(),
        );
        let message = Message::from_new(new.clone(), 7);

        assert_eq!(message.body, new.body);
        assert_eq!(message.direction, MessageDirection::Inbound);
        assert_eq!(message.sequence, 7);
    }
}
