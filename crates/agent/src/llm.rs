//! Completion client boundary.
//!
//! Agents never talk to a language model service directly; they build a
//! [`CompletionRequest`] and hand it to a [`CompletionClient`]. The engine
//! picks the implementation from configuration: an OpenAI-compatible HTTP
//! client for real deployments, or the static client for offline runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Speaker of one chat message, serialized in the wire casing the
/// completions endpoint expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Sampling knobs shared by every request an agent builds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self { max_tokens: 1024, temperature: 0.7 }
    }
}

/// One completion call: the full message transcript plus sampling settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, settings: CompletionSettings) -> Self {
        Self { messages, max_tokens: settings.max_tokens, temperature: settings.temperature }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),
}

/// Abstract completion service. Implementations must be safe to share
/// across the per-supplier workers of a negotiation.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

/// Provider that answers every request with one canned body. This is the
/// `static` provider mode, used for demos and smoke runs where no
/// completion service is reachable.
#[derive(Clone, Debug)]
pub struct StaticCompletionClient {
    response: String,
}

impl StaticCompletionClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

impl Default for StaticCompletionClient {
    fn default() -> Self {
        Self::new(
            "Thank you for the update. We are reviewing terms with our other \
             suppliers and will come back to you shortly.",
        )
    }
}

#[async_trait]
impl CompletionClient for StaticCompletionClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ChatMessage, ChatRole, CompletionClient, CompletionRequest, CompletionSettings,
        StaticCompletionClient,
    };

    #[test]
    fn settings_default_to_the_service_limits() {
        let settings = CompletionSettings::default();
        assert_eq!(settings.max_tokens, 1024);
        assert!((settings.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn request_copies_sampling_settings() {
        let request = CompletionRequest::new(
            vec![ChatMessage::system("You negotiate prices."), ChatMessage::user("Begin.")],
            CompletionSettings { max_tokens: 256, temperature: 0.2 },
        );

        assert_eq!(request.max_tokens, 256);
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert_eq!(request.messages[1].content, "Begin.");
    }

    #[tokio::test]
    async fn static_client_answers_with_its_canned_body() {
        let client = StaticCompletionClient::new("We accept your offer.");
        let request = CompletionRequest::new(
            vec![ChatMessage::user("Any movement on price?")],
            CompletionSettings::default(),
        );

        let reply = client.complete(request).await.expect("static client never fails");
        assert_eq!(reply, "We accept your offer.");
    }
}
