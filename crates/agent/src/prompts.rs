//! Prompt assembly for negotiator and orchestrator agents.
//!
//! Everything an agent says to the completion service is built here from
//! stored state: the negotiation brief, the persisted conversation history,
//! and optional orchestrator guidance. Agents themselves stay stateless.

use haggler_core::{Message, MessageDirection, SupplierId};

use crate::conclusion::{DEAL_AGREED_MARKER, NO_DEAL_MARKER};
use crate::llm::ChatMessage;

/// Longest text fragment quoted inside a cross-supplier summary line.
const SUMMARY_FRAGMENT_CHARS: usize = 160;

/// Borrowed view of the negotiation fields every instruction block needs.
#[derive(Clone, Copy, Debug)]
pub struct NegotiationBrief<'a> {
    pub product: &'a str,
    pub strategy: &'a str,
    pub tactics: &'a str,
}

/// Snapshot of one supplier conversation, prepared for the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub supplier_id: SupplierId,
    pub message_count: usize,
    pub concluded: bool,
    pub last_inbound: Option<String>,
    pub last_outbound: Option<String>,
}

/// Standing instructions for one supplier's negotiator. Stored on the agent
/// binding at start time, so reloading a negotiation reproduces them.
pub fn negotiator_instructions(brief: NegotiationBrief<'_>, insights: Option<&str>) -> String {
    let mut sections = vec![
        "You negotiate with one supplier over email on behalf of a buyer. \
         Keep replies concise and professional, and never reveal terms \
         offered by other suppliers."
            .to_string(),
        format!("Product to procure: {}", brief.product),
        format!("Negotiation strategy: {}", brief.strategy),
        format!("Tactics: {}", brief.tactics),
    ];
    if let Some(insights) = insights {
        sections.push(format!("What we know about this supplier: {insights}"));
    }
    sections.push(format!(
        "Write plain email bodies without signatures. When a deal is \
         reached, end your message with {DEAL_AGREED_MARKER}. When the \
         negotiation ends without agreement, end your message with \
         {NO_DEAL_MARKER}."
    ));
    sections.join("\n\n")
}

/// Standing instructions for the negotiation's orchestrator.
pub fn orchestrator_instructions(brief: NegotiationBrief<'_>) -> String {
    [
        "You coordinate the negotiators handling each supplier in one \
         procurement. You see a summary of every supplier conversation and \
         advise a single negotiator on its next reply. Keep advice short and \
         actionable. Never draft the email yourself."
            .to_string(),
        format!("Product to procure: {}", brief.product),
        format!("Negotiation strategy: {}", brief.strategy),
        format!("Tactics: {}", brief.tactics),
    ]
    .join("\n\n")
}

/// Transcript for a negotiator's opening email, before any supplier contact.
pub fn opening_messages(instructions: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(
            "Write your opening email to the supplier: introduce the request \
             and ask for their pricing.",
        ),
    ]
}

/// Transcript for a negotiator reply. Outbound history becomes assistant
/// turns and inbound history user turns, so the model sees the conversation
/// from the negotiator's side. Non-empty orchestrator guidance is appended
/// as a final system turn.
pub fn reply_messages(instructions: &str, history: &[Message], guidance: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(instructions));
    for message in history {
        match message.direction {
            MessageDirection::Outbound => messages.push(ChatMessage::assistant(&message.body)),
            MessageDirection::Inbound => messages.push(ChatMessage::user(&message.body)),
        }
    }
    if !guidance.trim().is_empty() {
        messages.push(ChatMessage::system(format!(
            "Guidance from the negotiation orchestrator: {guidance}"
        )));
    }
    messages
}

/// Transcript asking the orchestrator for guidance on one supplier's next
/// reply, given the state of every conversation.
pub fn advice_messages(
    instructions: &str,
    for_supplier: &SupplierId,
    summaries: &[ConversationSummary],
) -> Vec<ChatMessage> {
    let status_lines =
        summaries.iter().map(render_summary).collect::<Vec<_>>().join("\n");

    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!(
            "Conversation status across suppliers:\n{status_lines}\n\nGive \
             concise guidance for the next reply to supplier {for_supplier}."
        )),
    ]
}

fn render_summary(summary: &ConversationSummary) -> String {
    let state = if summary.concluded { "concluded" } else { "active" };
    let last_inbound = summary
        .last_inbound
        .as_deref()
        .map(|text| condense(text, SUMMARY_FRAGMENT_CHARS))
        .unwrap_or_else(|| "(none)".to_string());
    let last_outbound = summary
        .last_outbound
        .as_deref()
        .map(|text| condense(text, SUMMARY_FRAGMENT_CHARS))
        .unwrap_or_else(|| "(none)".to_string());

    format!(
        "- {}: {} messages, {state}; supplier last said: {last_inbound}; we last said: {last_outbound}",
        summary.supplier_id, summary.message_count
    )
}

/// Flattens whitespace and truncates on a character boundary.
fn condense(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut truncated: String = flat.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
