//! Inbound OpenAI chat-completion request types.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Model echoed back when the client omits `model`.
pub const DEFAULT_REQUEST_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// `developer`, `tool`, `function` and anything newer. Sent to the vendor
    /// as a question, like `user`.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A parsed `/v1/chat/completions` body.
///
/// Only the fields the vendor can use are kept; anything else the client sends
/// (`temperature`, `max_tokens`, …) is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

fn default_model() -> String {
    DEFAULT_REQUEST_MODEL.to_owned()
}

impl ChatRequest {
    /// Parse and validate a raw request body.
    ///
    /// # Errors
    /// [`AppError::InvalidBody`] if the bytes are not a valid request object,
    /// [`AppError::EmptyMessages`] if `messages` is empty.
    pub fn from_slice(body: &[u8]) -> Result<Self, AppError> {
        let request: Self = serde_json::from_slice(body)?;
        if request.messages.is_empty() {
            return Err(AppError::EmptyMessages);
        }
        Ok(request)
    }

    /// The text sent to the vendor as the query: the most recent `user`
    /// message, or the last message when no user turn exists.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .or_else(|| self.messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_request_with_defaults() {
        let req =
            ChatRequest::from_slice(br#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(req.model, DEFAULT_REQUEST_MODEL);
        assert!(!req.stream);
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn ignores_unknown_fields() {
        let body = br#"{
            "model": "o1",
            "temperature": 0.2,
            "stream": true,
            "messages": [{ "role": "system", "content": "s" }]
        }"#;
        let req = ChatRequest::from_slice(body).unwrap();
        assert_eq!(req.model, "o1");
        assert!(req.stream);
    }

    #[test]
    fn rejects_empty_messages() {
        let err = ChatRequest::from_slice(br#"{"model":"o1","messages":[]}"#).unwrap_err();
        assert!(matches!(err, AppError::EmptyMessages));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = ChatRequest::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, AppError::InvalidBody(_)));
    }

    #[test]
    fn accepts_roles_outside_the_core_three() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[
                {"role":"developer","content":"answer tersely"},
                {"role":"tool","content":"42"},
                {"role":"user","content":"hi"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.messages[0].role, Role::Other);
        assert_eq!(req.messages[1].role, Role::Other);
        assert_eq!(req.prompt(), "hi");
    }

    #[test]
    fn non_string_role_is_still_rejected() {
        let err = ChatRequest::from_slice(br#"{"messages":[{"role":7,"content":"x"}]}"#)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidBody(_)));
    }

    #[test]
    fn prompt_is_last_user_message() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[
                {"role":"user","content":"first"},
                {"role":"assistant","content":"answer"},
                {"role":"user","content":"second"},
                {"role":"assistant","content":"trailing"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.prompt(), "second");
    }

    #[test]
    fn prompt_falls_back_to_last_message_without_user_turns() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[{"role":"system","content":"be brief"}]}"#,
        )
        .unwrap();
        assert_eq!(req.prompt(), "be brief");
    }
}
