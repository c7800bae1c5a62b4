use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One transcript entry. The last message's `content` is rewritten in place
/// while a response is streaming; everything else is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    pub image_url: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: local_message_id(),
            role,
            content: content.into(),
            attachment_ids: Vec::new(),
            image_url: None,
        }
    }

    pub fn user(content: impl Into<String>, attachment_ids: Vec<String>) -> Self {
        Self {
            attachment_ids,
            ..Self::new(Role::User, content)
        }
    }

    /// Empty assistant entry appended optimistically before the first
    /// streamed token arrives.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, "")
    }

    /// Assistant entry carrying a generated image instead of text.
    pub fn generated_image(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::new(Role::Assistant, "")
        }
    }

    /// System messages and empty assistant placeholders are never shown.
    pub fn is_renderable(&self) -> bool {
        match self.role {
            Role::System => false,
            Role::Assistant => !self.content.trim().is_empty() || self.image_url.is_some(),
            Role::User => true,
        }
    }
}

/// Identifier for messages created locally before the server has seen them.
/// Opaque; only needs to be unique within one process.
fn local_message_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("local-{}-{seq}", chrono::Utc::now().timestamp_millis())
}

/// Conversation summary as it appears in the chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}

/// A fully loaded conversation.
#[derive(Debug, Clone)]
pub struct ChatDetails {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub messages: Vec<Message>,
    pub configuration: Option<Configuration>,
}

/// Persona configuration. Optionally attached to a conversation when it is
/// created and immutable for that conversation afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: String,
    pub user_name: String,
    pub ai_name: String,
    pub description: String,
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
        assert!(Role::try_from("tool").is_err());
    }

    #[test]
    fn system_messages_are_not_renderable() {
        assert!(!Message::new(Role::System, "prompt").is_renderable());
        assert!(Message::new(Role::User, "hi").is_renderable());
    }

    #[test]
    fn empty_assistant_placeholder_is_hidden_until_content_or_image() {
        let mut message = Message::assistant_placeholder();
        assert!(!message.is_renderable());

        message.content = "Hello".to_string();
        assert!(message.is_renderable());

        let image = Message::generated_image("https://cdn.example.com/i.png");
        assert!(image.is_renderable());
    }

    #[test]
    fn local_message_ids_are_unique() {
        let a = Message::assistant_placeholder();
        let b = Message::assistant_placeholder();
        assert_ne!(a.id, b.id);
    }
}
