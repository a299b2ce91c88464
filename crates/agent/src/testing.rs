//! Completion doubles for exercising engine behavior without a live service.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionClient, CompletionError, CompletionRequest};

#[derive(Debug, Default)]
struct ScriptedState {
    results: VecDeque<Result<String, CompletionError>>,
    requests: Vec<CompletionRequest>,
}

/// Completion client that replays a scripted result sequence and records
/// every request it saw. Once the script runs out it answers with a fixed
/// placeholder so long conversations keep moving.
#[derive(Debug, Default)]
pub struct ScriptedCompletionClient {
    state: Mutex<ScriptedState>,
}

impl ScriptedCompletionClient {
    pub fn with_results(results: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            state: Mutex::new(ScriptedState { results: results.into(), requests: Vec::new() }),
        }
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.requests.clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.requests.push(request);
        state.results.pop_front().unwrap_or_else(|| Ok("scripted response".to_string()))
    }
}

/// Completion client whose every call fails, for exercising degraded paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingCompletionClient;

#[async_trait]
impl CompletionClient for FailingCompletionClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::ServiceUnavailable("scripted outage".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::llm::{ChatMessage, CompletionClient, CompletionError, CompletionRequest, CompletionSettings};

    use super::{FailingCompletionClient, ScriptedCompletionClient};

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user(content)], CompletionSettings::default())
    }

    #[tokio::test]
    async fn scripted_client_replays_results_and_records_requests() {
        let client = ScriptedCompletionClient::with_results(vec![
            Ok("first".to_string()),
            Err(CompletionError::ServiceUnavailable("flaky".to_string())),
        ]);

        assert_eq!(client.complete(request("one")).await, Ok("first".to_string()));
        assert_eq!(
            client.complete(request("two")).await,
            Err(CompletionError::ServiceUnavailable("flaky".to_string()))
        );
        assert_eq!(client.complete(request("three")).await, Ok("scripted response".to_string()));

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].messages[0].content, "one");
        assert_eq!(requests[2].messages[0].content, "three");
    }

    #[tokio::test]
    async fn failing_client_always_reports_an_outage() {
        let client = FailingCompletionClient;
        let error = client.complete(request("any")).await.err().expect("client should fail");
        assert_eq!(error, CompletionError::ServiceUnavailable("scripted outage".to_string()));
    }
}
