use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a session title derived from its first message.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Locally generated notices (e.g. a failed chat turn). Never sent to
    /// the backend as part of the conversation history.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Text,
    Image,
    Video,
    Pptx,
}

/// A citation attached to an assistant reply, derived from the backend's
/// search grounding metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grounding_sources: Vec<GroundingSource>,
    /// Raw HTML fragment for the rendered search entry point, when the
    /// backend supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_entry_point: Option<String>,
}

impl Message {
    fn base(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            kind: MediaKind::Text,
            media_url: None,
            grounding_sources: Vec::new(),
            search_entry_point: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content.into())
    }

    pub fn assistant(
        content: impl Into<String>,
        grounding_sources: Vec<GroundingSource>,
        search_entry_point: Option<String>,
    ) -> Self {
        Self {
            grounding_sources,
            search_entry_point,
            ..Self::base(Role::Assistant, content.into())
        }
    }

    /// Assistant-authored message carrying a generated media reference.
    pub fn media(kind: MediaKind, content: impl Into<String>, media_url: Option<String>) -> Self {
        Self {
            kind,
            media_url,
            ..Self::base(Role::Assistant, content.into())
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: "New Chat".to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a message, deriving the title from the first one. Appended
    /// messages are never mutated afterwards; only the session's title and
    /// timestamp change, and the title only on the very first message.
    pub fn push(&mut self, message: Message) {
        if self.messages.is_empty() {
            self.title = truncate_title(&message.content);
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// First `TITLE_MAX_CHARS` characters of the content, on char boundaries.
pub fn truncate_title(content: &str) -> String {
    content.chars().take(TITLE_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}
