use chrono::{DateTime, Utc};

/// One inbound email lifted off the gateway, normalized for routing.
///
/// `thread_key` is the gateway's conversation token for reply threading
/// (derived from `In-Reply-To`/`References` on most providers). It is absent
/// when the counterparty opened a fresh thread or the gateway stripped the
/// headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEmail {
    pub message_id: String,
    pub thread_key: Option<String>,
    pub from_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Transport wrapper around an [`InboundEmail`].
///
/// The envelope id is the unit of acknowledgement: the gateway redelivers
/// any envelope that was never acked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailEnvelope {
    pub envelope_id: String,
    pub email: InboundEmail,
}
