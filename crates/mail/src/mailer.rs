use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use haggler_core::config::{MailConfig, MailOutbound};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Proof of hand-off returned by [`Mailer::send`].
///
/// `message_ref` is the gateway's identifier for the outbound message.
/// Replies thread back through it, so callers register it with their thread
/// bookkeeping before processing further inbound traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_ref: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("mail gateway rejected the message: {0}")]
    Rejected(String),
    #[error("mail gateway unreachable: {0}")]
    Unreachable(String),
    #[error("mail gateway timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound side of the mail gateway.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, SendError>;
}

/// Builds the configured outbound mailer.
pub fn mailer_from_config(config: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match config.outbound {
        MailOutbound::Noop => Ok(Arc::new(NoopMailer)),
        MailOutbound::HttpRelay => Ok(Arc::new(HttpRelayMailer::from_config(config)?)),
    }
}

/// Accepts every message without touching the network. Receipts are generated
/// locally so thread bookkeeping still works in dev setups.
#[derive(Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        _body: &str,
    ) -> Result<SendReceipt, SendError> {
        let receipt = SendReceipt { message_ref: format!("noop-{}", Uuid::new_v4().simple()) };
        debug!(to_address, subject, message_ref = %receipt.message_ref, "noop mailer accepted message");
        Ok(receipt)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedMessage {
    pub to_address: String,
    pub subject: String,
    pub body: String,
    /// The receipt ref issued for this send, for thread-key assertions.
    pub message_ref: String,
}

/// Captures outbound messages for inspection. Backs tests and the smoke
/// command.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<RecordedMessage>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<RecordedMessage> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, SendError> {
        let message_ref = format!("recorded-{}", Uuid::new_v4().simple());
        let message = RecordedMessage {
            to_address: to_address.to_owned(),
            subject: subject.to_owned(),
            body: body.to_owned(),
            message_ref: message_ref.clone(),
        };
        match self.sent.lock() {
            Ok(mut guard) => guard.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(SendReceipt { message_ref })
    }
}

#[derive(Debug, Serialize)]
struct RelaySendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelaySendResponse {
    message_ref: String,
}

/// Posts outbound messages to an HTTP mail relay.
pub struct HttpRelayMailer {
    client: Client,
    relay_url: String,
    relay_token: Option<SecretString>,
    from_address: String,
    send_timeout: Duration,
}

impl HttpRelayMailer {
    pub fn new(
        relay_url: String,
        relay_token: Option<SecretString>,
        from_address: String,
        send_timeout: Duration,
    ) -> Self {
        Self { client: Client::new(), relay_url, relay_token, from_address, send_timeout }
    }

    pub fn from_config(config: &MailConfig) -> anyhow::Result<Self> {
        let relay_url = config
            .relay_url
            .clone()
            .context("mail.relay_url is required for the http_relay outbound")?;
        Ok(Self::new(
            relay_url,
            config.relay_token.clone(),
            config.from_address.clone(),
            Duration::from_secs(config.send_timeout_secs),
        ))
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, SendError> {
        let request =
            RelaySendRequest { from: &self.from_address, to: to_address, subject, body };
        let mut builder =
            self.client.post(&self.relay_url).timeout(self.send_timeout).json(&request);
        if let Some(token) = &self.relay_token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                SendError::Timeout(self.send_timeout)
            } else {
                SendError::Unreachable(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.trim();
            if detail.is_empty() {
                return Err(SendError::Rejected(format!("relay returned {status}")));
            }
            return Err(SendError::Rejected(format!("relay returned {status}: {detail}")));
        }

        let receipt: RelaySendResponse = response
            .json()
            .await
            .map_err(|error| SendError::Rejected(format!("undecodable relay response: {error}")))?;

        debug!(
            to_address,
            message_ref = %receipt.message_ref,
            "relay accepted outbound message"
        );
        Ok(SendReceipt { message_ref: receipt.message_ref })
    }
}

#[cfg(test)]
mod tests {
    use haggler_core::config::{AppConfig, MailOutbound};

    use super::{mailer_from_config, HttpRelayMailer, Mailer, NoopMailer, RecordingMailer};

    #[tokio::test]
    async fn noop_mailer_issues_distinct_receipts() {
        let mailer = NoopMailer;
        let first = mailer
            .send("sales@acme-supply.example", "Bulk pricing", "Hello")
            .await
            .expect("noop send should succeed");
        let second = mailer
            .send("sales@acme-supply.example", "Bulk pricing", "Hello again")
            .await
            .expect("noop send should succeed");

        assert_ne!(first.message_ref, second.message_ref);
    }

    #[tokio::test]
    async fn recording_mailer_captures_messages_in_send_order() {
        let mailer = RecordingMailer::default();
        let first = mailer
            .send("a@supplier.example", "First", "body-1")
            .await
            .expect("recording send should succeed");
        mailer
            .send("b@supplier.example", "Second", "body-2")
            .await
            .expect("recording send should succeed");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to_address, "a@supplier.example");
        assert_eq!(sent[0].message_ref, first.message_ref);
        assert_eq!(sent[1].subject, "Second");
        assert_ne!(sent[0].message_ref, sent[1].message_ref);
    }

    #[test]
    fn http_relay_requires_a_relay_url() {
        let mut config = AppConfig::default().mail;
        config.outbound = MailOutbound::HttpRelay;
        config.relay_url = None;

        let error = HttpRelayMailer::from_config(&config)
            .err()
            .expect("construction without relay_url should fail");
        assert!(error.to_string().contains("relay_url"));
    }

    #[test]
    fn config_selects_the_relay_mailer() {
        let mut config = AppConfig::default().mail;
        config.outbound = MailOutbound::HttpRelay;
        config.relay_url = Some("https://relay.example/send".to_string());

        mailer_from_config(&config).expect("relay mailer should build from valid config");
    }
}
