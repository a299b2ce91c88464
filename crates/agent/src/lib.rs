//! Agents - LLM-backed negotiator and orchestrator roles
//!
//! This crate holds the conversational layer of haggler: the agents that
//! compose supplier emails and the completion client boundary they speak
//! through.
//!
//! # Architecture
//!
//! Agents are stateless composers over stored state:
//! 1. **Prompt assembly** (`prompts`) - Build chat transcripts from the
//!    negotiation brief, persisted history, and orchestrator guidance
//! 2. **Completion** (`llm`, `http`) - Send the transcript to a pluggable
//!    `CompletionClient` (OpenAI-compatible HTTP or static canned replies)
//! 3. **Conclusion detection** (`conclusion`) - Decide whether a composed
//!    reply ends its conversation via the `[DEAL-AGREED]`/`[NO-DEAL]` markers
//!
//! # Key Types
//!
//! - `NegotiatorAgent` - Composes the opening email and replies for one
//!   supplier conversation
//! - `OrchestratorAgent` - Advises negotiators from a cross-supplier view;
//!   never emails suppliers itself
//! - `CompletionClient` - Pluggable completion service boundary
//! - `ConclusionPolicy` - Terminal-reply detection
//!
//! # State Principle
//!
//! Agents hold identity and standing instructions only. Conversation state
//! lives in the message store, so any agent can be rebuilt from its persisted
//! binding mid-conversation.

pub mod conclusion;
pub mod http;
pub mod llm;
pub mod negotiator;
pub mod orchestrator;
pub mod prompts;
pub mod testing;
