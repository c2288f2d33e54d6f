use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned message id, monotonic within a conversation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Written by the subject (parent/student)
    In,
    /// Written by an operator
    Out,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub direction: Direction,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by_me: bool,
}

impl Message {
    pub fn new(id: i64, direction: Direction, content: impl Into<String>) -> Self {
        Self {
            id: MessageId(id),
            direction,
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            read_by_me: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub subject_id: i64,
    pub display_name: String,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_from_subject: u32,
    #[serde(default)]
    pub unread_from_operator: u32,
}

/// Internal operator note attached to a conversation
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Comment {
    pub id: i64,
    pub comment_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Collection envelope used by every list endpoint
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MarkReadRequest {
    pub last_message_id: MessageId,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommentRequest {
    pub comment_text: String,
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiChatRole {
    User,
    Assistant,
}

/// One turn of the co-pilot chat, persisted locally and replayed as history
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct AiChatEntry {
    pub role: AiChatRole,
    pub content: String,
}

impl AiChatEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AiChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: AiChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AiChatRequest {
    pub message: String,
    pub history: Vec<AiChatEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}
