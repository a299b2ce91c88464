//! Conversation conclusion detection.
//!
//! Negotiator instructions tell the model to end its final message with one
//! of two markers. The engine runs every outbound reply through a
//! [`ConclusionPolicy`] and stops the conversation when one matches.

/// Marker a negotiator appends when the supplier and buyer reached a deal.
pub const DEAL_AGREED_MARKER: &str = "[DEAL-AGREED]";

/// Marker a negotiator appends when the negotiation ends without agreement.
pub const NO_DEAL_MARKER: &str = "[NO-DEAL]";

pub trait ConclusionPolicy: Send + Sync {
    /// Whether this reply ends its conversation.
    fn is_terminal(&self, reply: &str) -> bool;
}

/// Default policy: a reply is terminal when it carries either marker.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerConclusionPolicy;

impl ConclusionPolicy for MarkerConclusionPolicy {
    fn is_terminal(&self, reply: &str) -> bool {
        reply.contains(DEAL_AGREED_MARKER) || reply.contains(NO_DEAL_MARKER)
    }
}
