//! HTTP completion client for OpenAI-compatible chat endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use haggler_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{
    ChatMessage, CompletionClient, CompletionError, CompletionRequest, StaticCompletionClient,
};

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

/// Completion client for any service exposing the `/chat/completions`
/// shape. The first choice's message body is the completion.
pub struct HttpCompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
}

impl HttpCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .context("llm.base_url is required for the openai_compatible provider")?;

        Ok(Self::new(
            base_url,
            config.api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let wire_request = WireRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut http_request = self
            .client
            .post(self.completions_url())
            .timeout(self.timeout)
            .json(&wire_request);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request.send().await.map_err(|error| {
            if error.is_timeout() {
                CompletionError::Timeout(self.timeout)
            } else {
                CompletionError::ServiceUnavailable(error.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(CompletionError::ServiceUnavailable(format!(
                "completion endpoint returned {}",
                response.status()
            )));
        }

        let body: WireResponse = response.json().await.map_err(|error| {
            CompletionError::ServiceUnavailable(format!("undecodable completion response: {error}"))
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            CompletionError::ServiceUnavailable("completion response carried no choices".to_string())
        })?;

        debug!(event_name = "agent.completion.received", model = %self.model, "completion received");
        Ok(choice.message.content)
    }
}

/// Builds the completion client the configured provider calls for.
pub fn completion_client_from_config(
    config: &LlmConfig,
) -> anyhow::Result<Arc<dyn CompletionClient>> {
    match config.provider {
        LlmProvider::Static => Ok(Arc::new(StaticCompletionClient::default())),
        LlmProvider::OpenAiCompatible => {
            Ok(Arc::new(HttpCompletionClient::from_config(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use haggler_core::config::{AppConfig, LlmProvider};

    use super::{completion_client_from_config, HttpCompletionClient};

    #[test]
    fn completions_url_tolerates_a_trailing_slash() {
        let client = HttpCompletionClient::new(
            "https://llm.internal.example/v1/",
            None,
            "gpt-oss-120b",
            std::time::Duration::from_secs(30),
        );

        assert_eq!(client.completions_url(), "https://llm.internal.example/v1/chat/completions");
    }

    #[test]
    fn openai_compatible_provider_requires_a_base_url() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::OpenAiCompatible;
        config.base_url = None;

        let error = HttpCompletionClient::from_config(&config)
            .err()
            .expect("missing base_url should be rejected");
        assert!(error.to_string().contains("llm.base_url"));
    }

    #[test]
    fn static_provider_builds_without_network_settings() {
        let config = AppConfig::default().llm;
        assert_eq!(config.provider, LlmProvider::Static);

        completion_client_from_config(&config).expect("static provider needs no base_url");
    }
}
