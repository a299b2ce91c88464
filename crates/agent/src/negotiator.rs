//! Per-supplier negotiator agent.

use std::sync::Arc;

use haggler_core::{Message, SupplierId};

use crate::llm::{CompletionClient, CompletionError, CompletionRequest, CompletionSettings};
use crate::prompts;

/// Negotiates with exactly one supplier. The agent holds only its identity
/// and standing instructions; conversation state lives in the message store,
/// so an equivalent agent can be rebuilt from a persisted binding at any
/// point in the conversation.
pub struct NegotiatorAgent {
    supplier_id: SupplierId,
    instructions: String,
    settings: CompletionSettings,
    client: Arc<dyn CompletionClient>,
}

impl NegotiatorAgent {
    pub fn new(
        supplier_id: SupplierId,
        instructions: impl Into<String>,
        settings: CompletionSettings,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self { supplier_id, instructions: instructions.into(), settings, client }
    }

    pub fn supplier_id(&self) -> &SupplierId {
        &self.supplier_id
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Composes the first email of the conversation.
    pub async fn opening_message(&self) -> Result<String, CompletionError> {
        let messages = prompts::opening_messages(&self.instructions);
        self.client.complete(CompletionRequest::new(messages, self.settings)).await
    }

    /// Composes the reply to the latest supplier message, given the full
    /// stored history and any orchestrator guidance.
    pub async fn reply(
        &self,
        history: &[Message],
        guidance: &str,
    ) -> Result<String, CompletionError> {
        let messages = prompts::reply_messages(&self.instructions, history, guidance);
        self.client.complete(CompletionRequest::new(messages, self.settings)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use haggler_core::{Message, MessageDirection, NegotiationId, SupplierId};

    use crate::llm::{ChatRole, CompletionSettings};
    use crate::testing::ScriptedCompletionClient;

    use super::NegotiatorAgent;

    fn agent(client: Arc<ScriptedCompletionClient>) -> NegotiatorAgent {
        NegotiatorAgent::new(
            SupplierId("acme".to_string()),
            "You negotiate chair prices.",
            CompletionSettings::default(),
            client,
        )
    }

    #[tokio::test]
    async fn opening_message_uses_only_the_standing_instructions() {
        let client = Arc::new(ScriptedCompletionClient::with_results(vec![Ok(
            "Hello, we are sourcing 500 chairs.".to_string(),
        )]));

        let opening = agent(Arc::clone(&client))
            .opening_message()
            .await
            .expect("scripted completion should succeed");
        assert_eq!(opening, "Hello, we are sourcing 500 chairs.");

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, ChatRole::System);
        assert_eq!(requests[0].messages[0].content, "You negotiate chair prices.");
    }

    #[tokio::test]
    async fn reply_feeds_history_and_guidance_into_the_request() {
        let client = Arc::new(ScriptedCompletionClient::with_results(vec![Ok(
            "Could you meet us at $92?".to_string(),
        )]));
        let history = vec![Message {
            negotiation_id: NegotiationId("neg-1".to_string()),
            supplier_id: SupplierId("acme".to_string()),
            direction: MessageDirection::Inbound,
            body: "Best we can do is $95 per unit.".to_string(),
            sent_at: Utc::now(),
            sequence: 1,
        }];

        let reply = agent(Arc::clone(&client))
            .reply(&history, "they have room below $95")
            .await
            .expect("scripted completion should succeed");
        assert_eq!(reply, "Could you meet us at $92?");

        let request = &client.requests()[0];
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].content, "Best we can do is $95 per unit.");
        assert!(request.messages[2].content.contains("they have room below $95"));
    }
}
