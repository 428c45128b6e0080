use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{ChatStorage, StorageError};
use crate::api::SourceRef;
use crate::core::message::{Conversation, ConversationMeta, Message, MessageStatus, Sender};

#[derive(Debug, Clone)]
struct StoredConversation {
    owner_id: String,
    conversation: Conversation,
}

#[derive(Debug, Default)]
struct Tables {
    conversations: Vec<StoredConversation>,
    messages: HashMap<String, Vec<Message>>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-process storage for offline sessions and tests.
///
/// Failure switches let callers exercise the error paths of the
/// synchronizer without a network.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    writes: AtomicUsize,
    fail_creates: AtomicBool,
    fail_inserts: AtomicBool,
    fail_conversation_deletes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of successful create/insert writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Messages written for `conversation_id`, including sources.
    pub fn stored_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.tables()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_conversation_deletes(&self, fail: bool) {
        self.fail_conversation_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatStorage for MemoryStorage {
    async fn create_conversation(
        &self,
        owner_id: &str,
        meta: &ConversationMeta,
    ) -> Result<Conversation, StorageError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("conversation creation disabled".into()));
        }
        let mut tables = self.tables();
        let id = tables.next_id("chat");
        let conversation = Conversation {
            remote_id: Some(id.clone()),
            name: meta.name.clone(),
            agent: meta.agent.clone(),
            model: meta.model.clone(),
            created_at: Utc::now(),
        };
        tables.conversations.push(StoredConversation {
            owner_id: owner_id.to_string(),
            conversation: conversation.clone(),
        });
        tables.messages.insert(id, Vec::new());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(conversation)
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        text: &str,
        sender: Sender,
        sources: &[SourceRef],
    ) -> Result<Message, StorageError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("message insert disabled".into()));
        }
        let mut tables = self.tables();
        if !tables.messages.contains_key(conversation_id) {
            return Err(StorageError::NotFound(format!("chat {conversation_id}")));
        }
        let id = tables.next_id("msg");
        let message = Message {
            local_id: 0,
            remote_id: Some(id),
            conversation_id: Some(conversation_id.to_string()),
            sender,
            text: text.to_string(),
            status: MessageStatus::Success,
            sources: sources.to_vec(),
            is_streaming: false,
            created_at: Utc::now(),
        };
        if let Some(log) = tables.messages.get_mut(conversation_id) {
            log.push(message.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(message)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        Ok(self.stored_messages(conversation_id))
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StorageError> {
        let tables = self.tables();
        Ok(tables
            .conversations
            .iter()
            .rev()
            .filter(|stored| stored.owner_id == owner_id)
            .map(|stored| stored.conversation.clone())
            .collect())
    }

    async fn delete_messages(&self, conversation_id: &str) -> Result<(), StorageError> {
        let mut tables = self.tables();
        if let Some(log) = tables.messages.get_mut(conversation_id) {
            log.clear();
        }
        Ok(())
    }

    async fn delete_conversation_record(&self, conversation_id: &str) -> Result<(), StorageError> {
        if self.fail_conversation_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("conversation delete disabled".into()));
        }
        let mut tables = self.tables();
        tables.conversations.retain(|stored| {
            stored.conversation.remote_id.as_deref() != Some(conversation_id)
        });
        tables.messages.remove(conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conversations_are_scoped_to_owner_and_newest_first() {
        let storage = MemoryStorage::new();
        let meta = |name: &str| ConversationMeta {
            name: name.into(),
            agent: "nextjs".into(),
            model: "llama3".into(),
        };
        storage.create_conversation("alice", &meta("first")).await.expect("first");
        storage.create_conversation("bob", &meta("other")).await.expect("other");
        storage.create_conversation("alice", &meta("second")).await.expect("second");

        let names: Vec<_> = storage
            .list_conversations("alice")
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn insert_into_unknown_conversation_fails() {
        let storage = MemoryStorage::new();
        let err = storage
            .insert_message("chat-404", "hi", Sender::User, &[])
            .await
            .expect_err("missing");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(storage.write_count(), 0);
    }
}
