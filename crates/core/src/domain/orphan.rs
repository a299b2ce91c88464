use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound event the router could not attribute to any live conversation.
/// Recorded durably for manual review; never silently dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrphanedEvent {
    pub sender_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub thread_key: Option<String>,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedEvent {
    pub id: i64,
    pub sender_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub thread_key: Option<String>,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

impl OrphanedEvent {
    pub fn from_new(new: NewOrphanedEvent, id: i64) -> Self {
        Self {
            id,
            sender_address: new.sender_address,
            subject: new.subject,
            body: new.body,
            thread_key: new.thread_key,
            reason: new.reason,
            received_at: new.received_at,
        }
    }
}
