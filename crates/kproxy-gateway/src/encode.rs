use serde_json::{Value as JsonValue, json};

use kproxy_protocol::openai::ChatMessage;

const CHAT_TRIGGER_TYPE: &str = "MANUAL";
const MESSAGE_ORIGIN: &str = "AI_EDITOR";

/// Serializes chat messages into the upstream conversation-state body.
///
/// The upstream only understands alternating user/assistant turns, so system
/// prompts are folded into the current user message. The last non-system
/// message becomes the current message; everything before it goes to history.
pub fn encode_conversation(
    conversation_id: &str,
    model: &str,
    messages: &[ChatMessage],
) -> JsonValue {
    let mut system_parts: Vec<String> = Vec::new();
    let mut turns: Vec<(&str, String)> = Vec::new();
    for message in messages {
        let text = message.content.text();
        if message.role == "system" {
            system_parts.push(text);
        } else {
            turns.push((message.role.as_str(), text));
        }
    }

    let current = match turns.pop() {
        Some((_, text)) => text,
        None => String::new(),
    };
    let current = if system_parts.is_empty() {
        current
    } else {
        format!("{}\n\n{current}", system_parts.join("\n"))
    };

    let history: Vec<JsonValue> = turns
        .iter()
        .map(|(role, text)| match *role {
            "assistant" => json!({
                "assistantResponseMessage": { "content": text }
            }),
            _ => json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model,
                    "origin": MESSAGE_ORIGIN,
                }
            }),
        })
        .collect();

    json!({
        "conversationState": {
            "chatTriggerType": CHAT_TRIGGER_TYPE,
            "conversationId": conversation_id,
            "currentMessage": {
                "userInputMessage": {
                    "content": current,
                    "modelId": model,
                    "origin": MESSAGE_ORIGIN,
                }
            },
            "history": history,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kproxy_protocol::openai::MessageContent;

    fn message(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }

    #[test]
    fn last_user_turn_becomes_the_current_message() {
        let body = encode_conversation(
            "conv-1",
            "claude-sonnet-4",
            &[
                message("user", "first"),
                message("assistant", "reply"),
                message("user", "second"),
            ],
        );
        let state = &body["conversationState"];
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "second"
        );
        let history = state["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["userInputMessage"]["content"], "first");
        assert_eq!(history[1]["assistantResponseMessage"]["content"], "reply");
    }

    #[test]
    fn system_prompt_is_folded_into_the_current_message() {
        let body = encode_conversation(
            "conv-1",
            "claude-sonnet-4",
            &[message("system", "be brief"), message("user", "hi")],
        );
        assert_eq!(
            body["conversationState"]["currentMessage"]["userInputMessage"]["content"],
            "be brief\n\nhi"
        );
    }
}
