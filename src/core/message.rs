use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn is_user(self) -> bool {
        self == Sender::User
    }

    pub fn is_bot(self) -> bool {
        self == Sender::Bot
    }
}

impl AsRef<str> for Sender {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Sender {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Sender::User),
            "bot" | "assistant" => Ok(Sender::Bot),
            _ => Err(format!("invalid message sender: {value}")),
        }
    }
}

impl TryFrom<String> for Sender {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Sender> for String {
    fn from(value: Sender) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

impl MessageStatus {
    /// Terminal messages are frozen until their conversation is deleted.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

/// Process-unique identifier assigned when a message is created locally.
pub type LocalMessageId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub local_id: LocalMessageId,
    /// Storage-assigned id; `None` until the message has been committed.
    pub remote_id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender: Sender,
    pub text: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// An optimistic user message; `Pending` until its commit settles.
    pub fn user(local_id: LocalMessageId, text: impl Into<String>) -> Self {
        Self {
            local_id,
            remote_id: None,
            conversation_id: None,
            sender: Sender::User,
            text: text.into(),
            status: MessageStatus::Pending,
            sources: Vec::new(),
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    pub fn bot_placeholder(local_id: LocalMessageId) -> Self {
        Self {
            local_id,
            remote_id: None,
            conversation_id: None,
            sender: Sender::Bot,
            text: String::new(),
            status: MessageStatus::Pending,
            sources: Vec::new(),
            is_streaming: true,
            created_at: Utc::now(),
        }
    }

    pub fn bot(
        local_id: LocalMessageId,
        text: impl Into<String>,
        status: MessageStatus,
        sources: Vec<SourceRef>,
    ) -> Self {
        Self {
            local_id,
            remote_id: None,
            conversation_id: None,
            sender: Sender::Bot,
            text: text.into(),
            status,
            sources,
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.remote_id.is_some()
    }

    pub fn is_user(&self) -> bool {
        self.sender.is_user()
    }

    pub fn is_bot(&self) -> bool {
        self.sender.is_bot()
    }
}

/// Metadata used when a conversation is first written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub name: String,
    pub agent: String,
    pub model: String,
}

const CONVERSATION_NAME_LIMIT: usize = 60;

impl ConversationMeta {
    /// Derive a sidebar name from the opening query.
    pub fn from_first_query(query: &str, agent: &str, model: &str) -> Self {
        let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
        let name = if collapsed.chars().count() > CONVERSATION_NAME_LIMIT {
            let mut truncated: String = collapsed.chars().take(CONVERSATION_NAME_LIMIT).collect();
            truncated.push('…');
            truncated
        } else {
            collapsed
        };
        Self {
            name,
            agent: agent.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Absent until the first durable write succeeds.
    pub remote_id: Option<String>,
    pub name: String,
    pub agent: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn draft(agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            remote_id: None,
            name: String::new(),
            agent: agent.into(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.remote_id.is_some()
    }
}
