//! Durable chat storage and the synchronizer that keeps it in step with
//! the conversation store.

pub mod memory;
pub mod rest;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::SourceRef;
use crate::core::message::{Conversation, ConversationMeta, Message, Sender};

pub use memory::MemoryStorage;
pub use rest::RestChatStorage;

#[derive(Debug)]
pub enum StorageError {
    Transport(reqwest::Error),
    Status { status: u16, body: String },
    Decode(String),
    NotFound(String),
    /// Storage refused the write for a reason of its own.
    Rejected(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Transport(err) => write!(f, "storage request failed: {err}"),
            StorageError::Status { status, body } => {
                write!(f, "storage returned status {status}: {}", body.trim())
            }
            StorageError::Decode(detail) => write!(f, "unreadable storage response: {detail}"),
            StorageError::NotFound(what) => write!(f, "not found in storage: {what}"),
            StorageError::Rejected(reason) => write!(f, "storage rejected the write: {reason}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StorageError::Decode(err.to_string())
        } else {
            StorageError::Transport(err)
        }
    }
}

/// Narrow CRUD contract over the chat database.
#[async_trait]
pub trait ChatStorage: Send + Sync {
    async fn create_conversation(
        &self,
        owner_id: &str,
        meta: &ConversationMeta,
    ) -> Result<Conversation, StorageError>;

    async fn insert_message(
        &self,
        conversation_id: &str,
        text: &str,
        sender: Sender,
        sources: &[SourceRef],
    ) -> Result<Message, StorageError>;

    /// Messages of one conversation in insertion order.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Conversations owned by `owner_id`, newest first.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StorageError>;

    async fn delete_messages(&self, conversation_id: &str) -> Result<(), StorageError>;

    async fn delete_conversation_record(&self, conversation_id: &str) -> Result<(), StorageError>;
}

/// Which half of a two-step deletion failed.
#[derive(Debug)]
pub enum DeleteStep {
    Messages,
    ConversationRecord,
}

#[derive(Debug)]
pub struct DeleteError {
    pub step: DeleteStep,
    pub source: StorageError,
}

impl fmt::Display for DeleteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            DeleteStep::Messages => write!(f, "failed to delete messages: {}", self.source),
            DeleteStep::ConversationRecord => write!(
                f,
                "messages were deleted but the conversation record was not: {}",
                self.source
            ),
        }
    }
}

impl Error for DeleteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Clone)]
pub struct PersistenceSynchronizer {
    storage: Arc<dyn ChatStorage>,
    owner_id: String,
}

impl PersistenceSynchronizer {
    pub fn new(storage: Arc<dyn ChatStorage>, owner_id: impl Into<String>) -> Self {
        Self {
            storage,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Create the durable conversation record if `conversation` has none yet.
    /// Returns the durable id either way.
    pub async fn ensure_conversation(
        &self,
        conversation: &mut Conversation,
        first_query: &str,
    ) -> Result<String, StorageError> {
        if let Some(id) = &conversation.remote_id {
            return Ok(id.clone());
        }

        let meta = ConversationMeta::from_first_query(
            first_query,
            &conversation.agent,
            &conversation.model,
        );
        let created = self
            .storage
            .create_conversation(&self.owner_id, &meta)
            .await?;
        let id = created
            .remote_id
            .clone()
            .ok_or_else(|| StorageError::Decode("created conversation has no id".into()))?;
        debug!(conversation_id = %id, "conversation created");
        *conversation = created;
        Ok(id)
    }

    pub async fn commit_user_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, StorageError> {
        self.storage
            .insert_message(conversation_id, text, Sender::User, &[])
            .await
    }

    /// Commit a finished answer as a single write.
    pub async fn commit_bot_message(
        &self,
        conversation_id: &str,
        text: &str,
        sources: &[SourceRef],
    ) -> Result<Message, StorageError> {
        self.storage
            .insert_message(conversation_id, text, Sender::Bot, sources)
            .await
    }

    pub async fn load_history(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        self.storage.fetch_messages(conversation_id).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        self.storage.list_conversations(&self.owner_id).await
    }

    /// Delete messages, then the conversation record. Not atomic: when the
    /// second write fails the messages are already gone.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), DeleteError> {
        self.storage
            .delete_messages(conversation_id)
            .await
            .map_err(|source| DeleteError {
                step: DeleteStep::Messages,
                source,
            })?;
        self.storage
            .delete_conversation_record(conversation_id)
            .await
            .map_err(|source| {
                warn!(%conversation_id, error = %source, "conversation left without messages");
                DeleteError {
                    step: DeleteStep::ConversationRecord,
                    source,
                }
            })
    }
}
