use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::envelope::InboundEmail;
use crate::transport::{MailTransport, NoopMailTransport, ReconnectPolicy, TransportError};

/// Correlation data handed to the sink alongside each inbound email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryContext {
    pub correlation_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("inbound delivery failed: {reason}")]
pub struct DeliveryError {
    pub reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Consumer of inbound emails. The negotiation engine's event router is the
/// production implementation.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(
        &self,
        email: InboundEmail,
        context: &DeliveryContext,
    ) -> Result<(), DeliveryError>;
}

/// Accepts and discards every inbound email.
#[derive(Default)]
pub struct NoopInboundSink;

#[async_trait]
impl InboundSink for NoopInboundSink {
    async fn deliver(
        &self,
        _email: InboundEmail,
        _context: &DeliveryContext,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Pump loop between a [`MailTransport`] and an [`InboundSink`].
///
/// An envelope is acknowledged only after the sink accepts it; a failed
/// hand-off leaves the envelope unacked and the gateway redelivers it later.
pub struct MailboxRunner {
    transport: Arc<dyn MailTransport>,
    sink: Arc<dyn InboundSink>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for MailboxRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopMailTransport),
            sink: Arc::new(NoopInboundSink),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl MailboxRunner {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        sink: Arc<dyn InboundSink>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, sink, reconnect_policy }
    }

    pub async fn run(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "mailbox transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "mailbox retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening mailbox transport connection");
        self.transport.connect().await?;
        info!(attempt, "mailbox transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "mailbox transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            info!(
                event_name = "ingress.mail.envelope_received",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                from_address = %envelope.email.from_address,
                thread_key = envelope.email.thread_key.as_deref().unwrap_or("none"),
                "received inbound email"
            );

            let context = DeliveryContext { correlation_id: envelope.envelope_id.clone() };
            if let Err(error) = self.sink.deliver(envelope.email.clone(), &context).await {
                // Unacked envelopes are redelivered by the gateway.
                warn!(
                    event_name = "ingress.mail.delivery_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    from_address = %envelope.email.from_address,
                    error = %error,
                    "inbound delivery failed; leaving envelope unacknowledged"
                );
                continue;
            }

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.mail.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge inbound email"
                );
            } else {
                debug!(
                    event_name = "ingress.mail.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged inbound email"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use super::{DeliveryContext, DeliveryError, InboundSink, MailboxRunner};
    use crate::envelope::{InboundEmail, MailEnvelope};
    use crate::transport::{MailTransport, ReconnectPolicy, TransportError};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<MailEnvelope>, TransportError>>,
        ack_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        ack_attempts: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<MailEnvelope>, TransportError>>,
            ack_results: Vec<Result<(), TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ack_results: ack_results.into(),
                    connect_attempts: 0,
                    ack_attempts: Vec::new(),
                    disconnect_calls: 0,
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn ack_attempts(&self) -> Vec<String> {
            self.state.lock().await.ack_attempts.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<MailEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.ack_attempts.push(envelope_id.to_owned());
            state.ack_results.pop_front().unwrap_or(Ok(()))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedSink {
        state: Mutex<ScriptedSinkState>,
    }

    #[derive(Default)]
    struct ScriptedSinkState {
        results: VecDeque<Result<(), DeliveryError>>,
        deliveries: Vec<String>,
    }

    impl ScriptedSink {
        fn with_results(results: Vec<Result<(), DeliveryError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedSinkState {
                    results: results.into(),
                    deliveries: Vec::new(),
                }),
            }
        }

        async fn deliveries(&self) -> Vec<String> {
            self.state.lock().await.deliveries.clone()
        }
    }

    #[async_trait]
    impl InboundSink for ScriptedSink {
        async fn deliver(
            &self,
            email: InboundEmail,
            _context: &DeliveryContext,
        ) -> Result<(), DeliveryError> {
            let mut state = self.state.lock().await;
            state.deliveries.push(email.message_id.clone());
            state.results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn envelope(envelope_id: &str, message_id: &str) -> MailEnvelope {
        MailEnvelope {
            envelope_id: envelope_id.to_owned(),
            email: InboundEmail {
                message_id: message_id.to_owned(),
                thread_key: Some("thread-1".to_owned()),
                from_address: "sales@acme-supply.example".to_owned(),
                subject: Some("Re: bulk pricing".to_owned()),
                body: "We can do $95 per unit.".to_owned(),
                received_at: Utc::now(),
            },
        }
    }

    fn fast_policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(envelope("env-1", "msg-1"))), Ok(None)],
            vec![],
        ));
        let sink = Arc::new(ScriptedSink::default());

        let runner = MailboxRunner::new(transport.clone(), sink.clone(), fast_policy(2));
        runner.run().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.ack_attempts().await, vec!["env-1"]);
        assert_eq!(sink.deliveries().await, vec!["msg-1"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
            vec![],
        ));
        let sink = Arc::new(ScriptedSink::default());

        let runner = MailboxRunner::new(transport.clone(), sink, fast_policy(2));
        runner.run().await.expect("runner should degrade gracefully");

        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_envelope_unacknowledged() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(envelope("env-1", "msg-1"))),
                Ok(Some(envelope("env-2", "msg-2"))),
                Ok(None),
            ],
            vec![],
        ));
        let sink = Arc::new(ScriptedSink::with_results(vec![
            Err(DeliveryError::new("router store unavailable")),
            Ok(()),
        ]));

        let runner = MailboxRunner::new(transport.clone(), sink.clone(), fast_policy(0));
        runner.run().await.expect("runner should not fail");

        // The first envelope stays unacked for redelivery; the pump keeps going.
        assert_eq!(sink.deliveries().await, vec!["msg-1", "msg-2"]);
        assert_eq!(transport.ack_attempts().await, vec!["env-2"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn ack_failure_does_not_stop_the_pump() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(envelope("env-1", "msg-1"))),
                Ok(Some(envelope("env-2", "msg-2"))),
                Ok(None),
            ],
            vec![Err(TransportError::Acknowledge("gateway hiccup".to_owned())), Ok(())],
        ));
        let sink = Arc::new(ScriptedSink::default());

        let runner = MailboxRunner::new(transport.clone(), sink.clone(), fast_policy(0));
        runner.run().await.expect("runner should not fail");

        assert_eq!(sink.deliveries().await, vec!["msg-1", "msg-2"]);
        assert_eq!(transport.ack_attempts().await, vec!["env-1", "env-2"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }
}
