use coach_llm::{CompletionRequest, UpstreamMessage};
use coach_protocol::{ChatMessage, Role};
use serde::Deserialize;

use crate::config::RelayConfig;

/// Lenient request shape: a body that fails to decode, or entries with
/// unknown roles or blank content, degrade to an empty history instead of a
/// hard failure.
#[derive(Debug, Deserialize)]
pub struct RawChatRequest {
    #[serde(default)]
    pub messages: Vec<RawChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for RawChatRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            stream: default_stream(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RawChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_stream() -> bool {
    true
}

pub fn parse_request(body: &[u8]) -> RawChatRequest {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Drops entries whose role is not user/assistant or whose content is blank.
pub fn sanitize(messages: Vec<RawChatMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .filter_map(|message| {
            let role = match message.role.trim() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };

            if message.content.trim().is_empty() {
                return None;
            }

            Some(ChatMessage::new(role, message.content))
        })
        .collect()
}

/// First-turn rule: at most one user-authored message in the history.
pub fn is_first_turn(history: &[ChatMessage]) -> bool {
    history
        .iter()
        .filter(|message| message.role == Role::User)
        .count()
        <= 1
}

/// Builds the outbound completion: exactly one instruction preamble ahead of
/// the supplied turns, plus the one-time styling note and the smaller output
/// cap on the first turn.
pub fn build_completion(config: &RelayConfig, history: &[ChatMessage]) -> CompletionRequest {
    let first_turn = is_first_turn(history);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(UpstreamMessage::system(&config.instructions));
    if first_turn {
        messages.push(UpstreamMessage::system(&config.first_turn_style));
    }

    for message in history {
        messages.push(match message.role {
            Role::User => UpstreamMessage::user(&message.content),
            Role::Assistant => UpstreamMessage::assistant(&message.content),
        });
    }

    CompletionRequest::new(&config.model, messages)
        .with_max_output_tokens(config.max_tokens_for(first_turn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_llm::UpstreamRole;

    fn raw(role: &str, content: &str) -> RawChatMessage {
        RawChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn parse_request_treats_malformed_bodies_as_empty() {
        let request = parse_request(b"this is not json");
        assert!(request.messages.is_empty());
        assert!(request.stream);

        let request = parse_request(b"{}");
        assert!(request.messages.is_empty());
        assert!(request.stream);
    }

    #[test]
    fn parse_request_honors_the_stream_flag() {
        let request = parse_request(br#"{"messages":[],"stream":false}"#);
        assert!(!request.stream);
    }

    #[test]
    fn sanitize_drops_unknown_roles_and_blank_content() {
        let history = sanitize(vec![
            raw("user", "hello"),
            raw("system", "sneaky preamble"),
            raw("assistant", "   "),
            raw("robot", "beep"),
            raw("assistant", "hi!"),
        ]);

        assert_eq!(
            history,
            vec![ChatMessage::user("hello"), ChatMessage::assistant("hi!")]
        );
    }

    #[test]
    fn first_turn_counts_user_messages_only() {
        assert!(is_first_turn(&[]));
        assert!(is_first_turn(&[
            ChatMessage::assistant("greeting"),
            ChatMessage::user("hello"),
        ]));
        assert!(!is_first_turn(&[
            ChatMessage::user("one"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("two"),
        ]));
    }

    #[test]
    fn first_turn_gets_style_note_and_small_cap() {
        let config = RelayConfig::default();
        let completion = build_completion(&config, &[ChatMessage::user("hello")]);

        let preamble_count = completion
            .messages
            .iter()
            .take_while(|message| matches!(message.role, UpstreamRole::System))
            .count();
        assert_eq!(preamble_count, 2);
        assert_eq!(completion.messages[0].content, config.instructions);
        assert_eq!(completion.messages[1].content, config.first_turn_style);
        assert_eq!(completion.messages[2].content, "hello");
        assert!(matches!(completion.messages[2].role, UpstreamRole::User));
        assert_eq!(
            completion.max_output_tokens,
            Some(config.first_turn_max_tokens)
        );
    }

    #[test]
    fn later_turns_get_one_preamble_and_regular_cap() {
        let config = RelayConfig::default();
        let history = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("two"),
        ];
        let completion = build_completion(&config, &history);

        let system_count = completion
            .messages
            .iter()
            .filter(|message| matches!(message.role, UpstreamRole::System))
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(completion.messages.len(), history.len() + 1);
        assert_eq!(completion.max_output_tokens, Some(config.reply_max_tokens));
    }

    #[test]
    fn instruction_preamble_always_leads() {
        let config = RelayConfig::default();
        for history in [
            Vec::new(),
            vec![ChatMessage::user("hola")],
            vec![ChatMessage::user("a"), ChatMessage::user("b")],
        ] {
            let completion = build_completion(&config, &history);
            assert!(matches!(completion.messages[0].role, UpstreamRole::System));
            assert_eq!(completion.messages[0].content, config.instructions);
        }
    }
}
