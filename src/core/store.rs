//! Ordered, observable message log for the conversation in view.
//!
//! Finalized messages live in insertion order. The bot answer being
//! streamed is held separately and only merged into the list once it
//! reaches a terminal status, so there is never ambiguity about which
//! message is still mutable.

use crate::api::SourceRef;
use crate::core::message::{LocalMessageId, Message, MessageStatus, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A stream session for this conversation is `Streaming`.
    Streaming,
    /// A single-shot generation request is outstanding.
    AwaitingAnswer,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    in_progress: Option<Message>,
    activity: Option<Activity>,
    next_local_id: LocalMessageId,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> LocalMessageId {
        self.next_local_id += 1;
        self.next_local_id
    }

    /// Finalized messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn in_progress(&self) -> Option<&Message> {
        self.in_progress.as_ref()
    }

    /// Everything a presentation layer should draw, in order.
    pub fn transcript(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().chain(self.in_progress.iter())
    }

    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.in_progress.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, local_id: LocalMessageId) -> Option<&Message> {
        self.transcript().find(|message| message.local_id == local_id)
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_some()
    }

    pub fn activity(&self) -> Option<Activity> {
        self.activity
    }

    pub fn set_activity(&mut self, activity: Option<Activity>) {
        self.activity = activity;
    }

    /// Optimistically record what the user just sent.
    pub fn append_user_message(
        &mut self,
        text: impl Into<String>,
        conversation_id: Option<String>,
    ) -> LocalMessageId {
        let local_id = self.allocate_id();
        let mut message = Message::user(local_id, text);
        message.conversation_id = conversation_id;
        self.messages.push(message);
        local_id
    }

    /// Open the in-progress bot message. Returns `None` while another answer
    /// is still open.
    pub fn begin_bot_message(&mut self, conversation_id: Option<String>) -> Option<LocalMessageId> {
        if self.in_progress.is_some() {
            return None;
        }
        let local_id = self.allocate_id();
        let mut message = Message::bot_placeholder(local_id);
        message.conversation_id = conversation_id;
        self.in_progress = Some(message);
        Some(local_id)
    }

    fn in_progress_mut(&mut self, local_id: LocalMessageId) -> Option<&mut Message> {
        self.in_progress
            .as_mut()
            .filter(|message| message.local_id == local_id)
    }

    pub fn append_bot_delta(&mut self, local_id: LocalMessageId, delta: &str) -> bool {
        match self.in_progress_mut(local_id) {
            Some(message) => {
                message.text.push_str(delta);
                true
            }
            None => false,
        }
    }

    pub fn attach_sources(&mut self, local_id: LocalMessageId, sources: Vec<SourceRef>) -> bool {
        match self.in_progress_mut(local_id) {
            Some(message) => {
                message.sources = sources;
                true
            }
            None => false,
        }
    }

    /// Freeze the in-progress bot message with a terminal `status` and move
    /// it into the ordered list.
    pub fn finalize_bot_message(
        &mut self,
        local_id: LocalMessageId,
        status: MessageStatus,
    ) -> Option<&Message> {
        self.in_progress_mut(local_id)?;
        let mut message = self.in_progress.take()?;
        message.status = if status.is_terminal() {
            status
        } else {
            MessageStatus::Success
        };
        message.is_streaming = false;
        self.messages.push(message);
        self.messages.last()
    }

    /// Append an already-complete bot message (single-shot answers and
    /// locally produced failure notices).
    pub fn push_bot_message(
        &mut self,
        text: impl Into<String>,
        status: MessageStatus,
        sources: Vec<SourceRef>,
        conversation_id: Option<String>,
    ) -> LocalMessageId {
        let local_id = self.allocate_id();
        let mut message = Message::bot(local_id, text, status, sources);
        message.conversation_id = conversation_id;
        self.messages.push(message);
        local_id
    }

    /// Drop the most recent finalized message. Used to undo an optimistic
    /// user message when the send path is abandoned.
    pub fn rollback_last_message(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn mark_durable(
        &mut self,
        local_id: LocalMessageId,
        remote_id: String,
        conversation_id: &str,
    ) -> bool {
        let target = self
            .messages
            .iter_mut()
            .chain(self.in_progress.iter_mut())
            .find(|message| message.local_id == local_id);
        match target {
            Some(message) => {
                message.remote_id = Some(remote_id);
                message.conversation_id = Some(conversation_id.to_string());
                if message.is_user() && message.status == MessageStatus::Pending {
                    message.status = MessageStatus::Success;
                }
                true
            }
            None => false,
        }
    }

    /// Settle a user message whose commit failed. It stays visible and
    /// non-durable.
    pub fn settle_user_message(&mut self, local_id: LocalMessageId) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|message| message.local_id == local_id && message.is_user())
        {
            Some(message) => {
                if message.status == MessageStatus::Pending {
                    message.status = MessageStatus::Success;
                }
                true
            }
            None => false,
        }
    }

    /// Stamp a freshly created conversation id onto messages that were
    /// composed before it existed.
    pub fn assign_conversation_id(&mut self, conversation_id: &str) {
        for message in self
            .messages
            .iter_mut()
            .chain(self.in_progress.iter_mut())
            .filter(|message| message.conversation_id.is_none())
        {
            message.conversation_id = Some(conversation_id.to_string());
        }
    }

    /// Replace the log with a history fetched from storage.
    pub fn replace_all(&mut self, history: Vec<Message>) {
        self.clear();
        for mut message in history {
            message.local_id = self.allocate_id();
            message.is_streaming = false;
            self.messages.push(message);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.in_progress = None;
        self.activity = None;
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.sender == Sender::User)
            .map(|message| message.text.as_str())
    }
}
