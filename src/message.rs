use serde::{Deserialize, Serialize};

/// Role constants for prompt messages sent to completion providers.
pub mod roles {
    /// Human turn: the task, plan, draft or critique being worked on.
    pub const USER: &str = "user";
    /// Model output.
    pub const ASSISTANT: &str = "assistant";
    /// Step instructions (the prompt templates in `essay::prompts`).
    pub const SYSTEM: &str = "system";
}

/// One turn of a prompt conversation.
///
/// Step nodes build a short `[system, user]` conversation and hand it to a
/// [`crate::providers::LanguageModel`].
///
/// ```
/// use essay_graph::message::Message;
///
/// let prompt = vec![
///     Message::system("You are an expert writer."),
///     Message::user("The history of tea"),
/// ];
/// assert!(prompt[0].is_system());
/// assert!(prompt.iter().all(Message::is_valid));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(roles::USER, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(roles::ASSISTANT, content)
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(roles::SYSTEM, content)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    pub fn is_user(&self) -> bool {
        self.has_role(roles::USER)
    }

    pub fn is_assistant(&self) -> bool {
        self.has_role(roles::ASSISTANT)
    }

    pub fn is_system(&self) -> bool {
        self.has_role(roles::SYSTEM)
    }

    /// A message is valid when both role and content are non-blank.
    pub fn is_valid(&self) -> bool {
        !self.role.trim().is_empty() && !self.content.trim().is_empty()
    }
}

/// Joins the content of every message with the given role, in order.
///
/// Provider adapters use this to fold a conversation into the
/// preamble/prompt pair that `rig` agents expect.
pub fn join_role(messages: &[Message], role: &str) -> String {
    messages
        .iter()
        .filter(|m| m.has_role(role))
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert!(Message::user("hi").is_user());
        assert!(Message::assistant("hello").is_assistant());
        assert!(Message::system("be brief").is_system());
        assert_eq!(Message::new("tool", "ok").role, "tool");
    }

    #[test]
    fn blank_content_is_invalid() {
        assert!(!Message::user("   ").is_valid());
        assert!(!Message::new("", "text").is_valid());
        assert!(Message::user("text").is_valid());
    }

    #[test]
    fn join_role_keeps_order_and_filters() {
        let msgs = vec![
            Message::system("a"),
            Message::user("question"),
            Message::system("b"),
        ];
        assert_eq!(join_role(&msgs, roles::SYSTEM), "a\n\nb");
        assert_eq!(join_role(&msgs, roles::USER), "question");
        assert_eq!(join_role(&msgs, roles::ASSISTANT), "");
    }

    #[test]
    fn serde_shape_is_flat() {
        let msg = Message::user("x");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "x"}));
    }
}
