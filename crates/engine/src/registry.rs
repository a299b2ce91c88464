//! Process-wide table of live negotiation sessions.

use std::collections::HashMap;
use std::sync::Arc;

use haggler_core::NegotiationId;
use tokio::sync::RwLock;
use tracing::debug;

use crate::session::NegotiationSession;

/// Live sessions keyed by negotiation id. Exactly one session exists per
/// active negotiation: inserted on start, looked up on every inbound event
/// and status query, evicted when the negotiation reaches a terminal status.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<NegotiationId, Arc<NegotiationSession>>>,
}

impl SessionRegistry {
    pub async fn insert(&self, session: Arc<NegotiationSession>) {
        let negotiation_id = session.negotiation_id().clone();
        self.sessions.write().await.insert(negotiation_id.clone(), session);
        debug!(
            event_name = "registry.session_inserted",
            negotiation_id = %negotiation_id,
            "session registered"
        );
    }

    pub async fn get(&self, id: &NegotiationId) -> Option<Arc<NegotiationSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn evict(&self, id: &NegotiationId) -> bool {
        let evicted = self.sessions.write().await.remove(id).is_some();
        if evicted {
            debug!(
                event_name = "registry.session_evicted",
                negotiation_id = %id,
                "session evicted"
            );
        }
        evicted
    }

    /// Snapshot of every live session, for address-based routing.
    pub async fn active_sessions(&self) -> Vec<Arc<NegotiationSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
