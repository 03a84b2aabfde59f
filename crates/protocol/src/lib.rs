//! Wire types shared by the relay server and the chat client.
//!
//! The relay speaks JSON over `POST /api/chat`: a [`ChatRequest`] in, and
//! either one aggregated [`ChatReply`] or a `text/event-stream` of
//! [`Fragment`]s back.

use serde::{Deserialize, Serialize};

/// Chat speaker role as it appears on the wire.
///
/// The relay only accepts `user` and `assistant` from clients; instruction
/// preambles are added server-side and never travel on this interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Returns true when the message carries visible text.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// `false` selects the aggregated `{"reply"}` mode.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            stream: true,
        }
    }

    pub fn aggregated(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            stream: false,
        }
    }
}

fn default_stream() -> bool {
    true
}

/// Aggregated (non-streaming) success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Structured error body for any non-2xx relay response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// One unit of a streamed reply.
///
/// Serialized shapes are fixed: `{"delta": ...}`, `{"error": ...}`,
/// `{"done": true}`. Consumed exactly once by the client, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Delta { delta: String },
    Error { error: String },
    Done { done: bool },
}

impl Fragment {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { delta: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    /// Terminal fragments end the stream; exactly one is emitted per turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_wire_shapes_are_fixed() {
        assert_eq!(
            serde_json::to_string(&Fragment::delta("Hi")).unwrap(),
            r#"{"delta":"Hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&Fragment::error("boom")).unwrap(),
            r#"{"error":"boom"}"#
        );
        assert_eq!(
            serde_json::to_string(&Fragment::done()).unwrap(),
            r#"{"done":true}"#
        );
    }

    #[test]
    fn fragment_round_trips_from_json() {
        let delta: Fragment = serde_json::from_str(r#"{"delta":" there"}"#).unwrap();
        assert_eq!(delta, Fragment::delta(" there"));
        assert!(!delta.is_terminal());

        let done: Fragment = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(done.is_terminal());

        let error: Fragment = serde_json::from_str(r#"{"error":"upstream failed"}"#).unwrap();
        assert!(error.is_terminal());
    }

    #[test]
    fn chat_request_defaults_to_streaming() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hello"}]}"#).unwrap();
        assert!(request.stream);
        assert_eq!(request.messages, vec![ChatMessage::user("hello")]);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let message = ChatMessage::assistant("hi");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn has_content_rejects_whitespace() {
        assert!(!ChatMessage::user("   ").has_content());
        assert!(ChatMessage::user("hola").has_content());
    }
}
