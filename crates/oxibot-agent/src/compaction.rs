//! Auto-compaction — summarize older messages when approaching the model's
//! context window, keeping the system prompt and the most recent turns intact.
//!
//! Port of nanobot's `agent/compaction.py`.

use oxibot_core::types::Message;

/// How many of the most recent messages are always kept verbatim.
pub const KEEP_RECENT: usize = 6;

/// Tool results longer than this are truncated before being summarized.
const MAX_TOOL_RESULT_CHARS: usize = 1000;

/// Whether prompt token usage has crossed `context_window * threshold`.
pub fn needs_compaction(prompt_tokens: u32, context_window: u32, threshold: f64) -> bool {
    (prompt_tokens as f64) >= (context_window as f64) * threshold
}

/// Slice indices `[start, end)` of `messages` eligible for compaction.
///
/// Always preserves `messages[0]` (the system prompt) and the last
/// `keep_recent` messages. Returns `(0, 0)` when there's nothing worth
/// compacting.
pub fn select_messages_to_compact(messages: &[Message], keep_recent: usize) -> (usize, usize) {
    let start = 1;
    let len = messages.len();
    let end = len.saturating_sub(keep_recent);

    if end <= start {
        (0, 0)
    } else {
        (start, end)
    }
}

/// Build the two-message summarization request for `messages[start..end]`.
pub fn build_compaction_request(messages_slice: &[Message]) -> Vec<Message> {
    let mut parts: Vec<String> = Vec::with_capacity(messages_slice.len());

    for msg in messages_slice {
        match msg {
            Message::Tool { content, name, .. } => {
                let tool_name = name.as_deref().unwrap_or("tool");
                let text = if content.chars().count() > MAX_TOOL_RESULT_CHARS {
                    let truncated: String = content.chars().take(MAX_TOOL_RESULT_CHARS).collect();
                    format!("{truncated}…[truncated]")
                } else {
                    content.clone()
                };
                parts.push(format!("[tool:{tool_name}] {text}"));
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let body = content.as_deref().unwrap_or("");
                match tool_calls {
                    Some(calls) if !calls.is_empty() => {
                        let names: Vec<&str> =
                            calls.iter().map(|tc| tc.function.name.as_str()).collect();
                        parts.push(format!(
                            "[assistant → tool_calls: {}] {}",
                            names.join(", "),
                            body
                        ));
                    }
                    _ => parts.push(format!("[assistant] {body}")),
                }
            }
            Message::System { content } => parts.push(format!("[system] {content}")),
            Message::User { content } => {
                let text = match content {
                    oxibot_core::types::MessageContent::Text(t) => t.clone(),
                    oxibot_core::types::MessageContent::Parts(parts) => parts
                        .iter()
                        .filter_map(|p| match p {
                            oxibot_core::types::ContentPart::Text { text } => Some(text.clone()),
                            oxibot_core::types::ContentPart::ImageUrl { .. } => None,
                        })
                        .collect::<Vec<_>>()
                        .join(" "),
                };
                parts.push(format!("[user] {text}"));
            }
        }
    }

    let conversation_text = parts.join("\n");

    vec![
        Message::system(
            "Summarize the following conversation fragment concisely. \
             Preserve all key facts, decisions, tool results, and context \
             the assistant will need to continue the conversation. \
             Output only the summary, no preamble.",
        ),
        Message::user(conversation_text),
    ]
}

/// Replace `messages[start..end]` with a single synthetic user-role summary message.
pub fn apply_compaction(messages: &[Message], start: usize, end: usize, summary: &str) -> Vec<Message> {
    let summary_message = Message::user(format!("[Previous conversation summary]\n{summary}"));

    let mut result = Vec::with_capacity(messages.len() - (end - start) + 1);
    result.extend_from_slice(&messages[..start]);
    result.push(summary_message);
    result.extend_from_slice(&messages[end..]);
    result
}
