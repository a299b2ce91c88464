//! Cross-supplier orchestrator agent.

use std::sync::Arc;

use haggler_core::SupplierId;
use tracing::warn;

use crate::llm::{CompletionClient, CompletionRequest, CompletionSettings};
use crate::prompts::{self, ConversationSummary};

/// Advises negotiators using the state of every supplier conversation in a
/// negotiation. The orchestrator never emails suppliers itself; its output
/// is folded into the next negotiator request as guidance.
pub struct OrchestratorAgent {
    instructions: String,
    settings: CompletionSettings,
    client: Arc<dyn CompletionClient>,
}

impl OrchestratorAgent {
    pub fn new(
        instructions: impl Into<String>,
        settings: CompletionSettings,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self { instructions: instructions.into(), settings, client }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Guidance for the next reply to `for_supplier`. A completion failure
    /// degrades to empty guidance rather than an error; the negotiator then
    /// replies unguided.
    pub async fn advise(
        &self,
        for_supplier: &SupplierId,
        summaries: &[ConversationSummary],
    ) -> String {
        let messages = prompts::advice_messages(&self.instructions, for_supplier, summaries);
        match self.client.complete(CompletionRequest::new(messages, self.settings)).await {
            Ok(advice) => advice,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.advice_degraded",
                    supplier_id = %for_supplier,
                    error = %error,
                    "orchestrator advice unavailable; negotiator proceeds unguided"
                );
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use haggler_core::SupplierId;

    use crate::llm::{CompletionClient, CompletionSettings};
    use crate::prompts::ConversationSummary;
    use crate::testing::{FailingCompletionClient, ScriptedCompletionClient};

    use super::OrchestratorAgent;

    fn summaries() -> Vec<ConversationSummary> {
        vec![ConversationSummary {
            supplier_id: SupplierId("acme".to_string()),
            message_count: 2,
            concluded: false,
            last_inbound: Some("We can do $95.".to_string()),
            last_outbound: Some("Asking for $90.".to_string()),
        }]
    }

    #[tokio::test]
    async fn advise_returns_the_completion_body() {
        let client = Arc::new(ScriptedCompletionClient::with_results(vec![Ok(
            "Hold at $90; acme moved twice already.".to_string(),
        )]));
        let orchestrator = OrchestratorAgent::new(
            "You coordinate negotiators.",
            CompletionSettings::default(),
            Arc::clone(&client) as Arc<dyn CompletionClient>,
        );

        let advice =
            orchestrator.advise(&SupplierId("acme".to_string()), &summaries()).await;
        assert_eq!(advice, "Hold at $90; acme moved twice already.");

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[1].content.contains("acme: 2 messages, active"));
    }

    #[tokio::test]
    async fn advise_degrades_to_empty_guidance_on_failure() {
        let orchestrator = OrchestratorAgent::new(
            "You coordinate negotiators.",
            CompletionSettings::default(),
            Arc::new(FailingCompletionClient),
        );

        let advice =
            orchestrator.advise(&SupplierId("acme".to_string()), &summaries()).await;
        assert_eq!(advice, "");
    }
}
