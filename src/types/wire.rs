use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

/// One prior turn sent as context with a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// `"user"` or `"assistant"`.
    pub role: String,

    /// The turn's text.
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.text.clone(),
        }
    }
}

/// Request body for the event-stream and single-shot endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    /// The new user prompt.
    pub message: String,

    /// Trailing window of earlier turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    /// Create a new `ChatRequest` from a prompt and prior turns.
    pub fn new(message: impl Into<String>, history: &[Message]) -> Self {
        Self {
            message: message.into(),
            history: history.iter().map(HistoryEntry::from).collect(),
        }
    }
}

/// Response body of the single-shot endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    /// The complete assistant reply.
    pub response: String,
}

/// One turn in the plain-text endpoint's request, which names the assistant `model`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlainTextTurn {
    /// `"user"` or `"model"`.
    pub role: String,

    /// The turn's text.
    pub text: String,
}

impl From<&Message> for PlainTextTurn {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        Self {
            role: role.to_string(),
            text: message.text.clone(),
        }
    }
}

/// Request body for the plain-text endpoint: the whole windowed conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlainTextRequest {
    /// Prior turns followed by the new user prompt.
    pub messages: Vec<PlainTextTurn>,
}

impl PlainTextRequest {
    /// Create a new `PlainTextRequest` ending with `prompt`.
    pub fn new(prompt: impl Into<String>, history: &[Message]) -> Self {
        let mut messages: Vec<PlainTextTurn> = history.iter().map(PlainTextTurn::from).collect();
        messages.push(PlainTextTurn {
            role: "user".to_string(),
            text: prompt.into(),
        });
        Self { messages }
    }
}

/// A decoded `data:` frame of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A fragment of assistant text.
    Content(String),

    /// The `[DONE]` end-of-stream marker.
    Done,

    /// The server gave up and reported why.
    Error(String),
}

#[derive(Deserialize)]
struct FramePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamFrame {
    /// Decode the payload that follows `data:` on a frame line.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        if data == "[DONE]" {
            return Ok(StreamFrame::Done);
        }
        let payload: FramePayload = serde_json::from_str(data)?;
        match (payload.error, payload.content) {
            (Some(error), _) => Ok(StreamFrame::Error(error)),
            (None, content) => Ok(StreamFrame::Content(content.unwrap_or_default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn chat_request_serialization() {
        let history = vec![Message::user("hi"), Message::assistant("Hello!")];
        let request = ChatRequest::new("Plan my week", &history);
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "message": "Plan my week",
                "history": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "Hello!"}
                ]
            })
        );
    }

    #[test]
    fn plain_text_request_names_assistant_model() {
        let history = vec![Message::user("hi"), Message::assistant("Hello!")];
        let request = PlainTextRequest::new("Protein ideas?", &history);
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "messages": [
                    {"role": "user", "text": "hi"},
                    {"role": "model", "text": "Hello!"},
                    {"role": "user", "text": "Protein ideas?"}
                ]
            })
        );
    }

    #[test]
    fn parse_frames() {
        assert_eq!(
            StreamFrame::parse(r#"{"content": "Hello"}"#).unwrap(),
            StreamFrame::Content("Hello".to_string())
        );
        assert_eq!(StreamFrame::parse("[DONE]").unwrap(), StreamFrame::Done);
        assert_eq!(
            StreamFrame::parse(r#"{"error": "quota exhausted"}"#).unwrap(),
            StreamFrame::Error("quota exhausted".to_string())
        );
        assert_eq!(
            StreamFrame::parse("{}").unwrap(),
            StreamFrame::Content(String::new())
        );
        assert!(StreamFrame::parse("{not json").is_err());
    }
}
