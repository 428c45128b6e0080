//! Chat orchestration: optimistic store updates, lazy persistence, the
//! streaming session and cancellation, tied together per conversation.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cancel::{CancellationController, InterruptHandle};
use crate::core::chat_stream::{ChatStreamService, StreamMessage, TaggedStreamMessage};
use crate::core::message::{Conversation, LocalMessageId, Message, MessageStatus};
use crate::core::persistence::{DeleteError, PersistenceSynchronizer, StorageError};
use crate::core::providers::{
    GenerationProvider, ProviderError, ProviderId, ProviderRegistry, QueryContext,
};
use crate::core::session::{DispatchOutcome, FinalAnswer, SessionState, StreamSession};
use crate::core::store::{Activity, ConversationStore};

pub const SINGLE_SHOT_FAILURE_NOTICE: &str = "Something went wrong. Please try again.";
pub const UNSUPPORTED_STREAMING_NOTICE: &str =
    "This provider does not support streaming responses.";

#[derive(Debug)]
pub enum ChatError {
    /// A session is streaming or an answer is pending.
    Busy,
    EmptyQuery,
    Provider(ProviderError),
    Storage(StorageError),
    Delete(DeleteError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Busy => write!(f, "an answer is still in progress"),
            ChatError::EmptyQuery => write!(f, "query is empty"),
            ChatError::Provider(err) => write!(f, "{err}"),
            ChatError::Storage(err) => write!(f, "{err}"),
            ChatError::Delete(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChatError::Provider(err) => Some(err),
            ChatError::Storage(err) => Some(err),
            ChatError::Delete(err) => Some(err),
            ChatError::Busy | ChatError::EmptyQuery => None,
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        ChatError::Provider(err)
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        ChatError::Storage(err)
    }
}

impl From<DeleteError> for ChatError {
    fn from(err: DeleteError) -> Self {
        ChatError::Delete(err)
    }
}

#[derive(Debug)]
pub enum CommitOutcome {
    Committed { remote_id: String },
    Failed(StorageError),
}

#[derive(Debug)]
pub enum SendOutcome {
    Streaming { stream_id: u64 },
    /// The stream never started; an error message is already in the store.
    Failed,
}

#[derive(Debug)]
pub enum ClientEvent {
    /// A chunk was dispatched; the in-progress message may have changed.
    Progress,
    Completed {
        local_id: LocalMessageId,
        commit: CommitOutcome,
    },
    Errored,
    Cancelled,
}

impl ClientEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClientEvent::Progress)
    }
}

pub struct ChatClient {
    registry: Arc<ProviderRegistry>,
    provider: Arc<dyn GenerationProvider>,
    agent: String,
    sync: PersistenceSynchronizer,
    store: ConversationStore,
    conversation: Conversation,
    session: Option<StreamSession>,
    stream_service: ChatStreamService,
    stream_rx: mpsc::UnboundedReceiver<TaggedStreamMessage>,
    cancel: CancellationController,
    active_token: Option<CancellationToken>,
}

impl ChatClient {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        provider_id: ProviderId,
        agent: impl Into<String>,
        sync: PersistenceSynchronizer,
    ) -> Result<Self, ChatError> {
        let provider = registry.resolve(provider_id)?;
        let agent = agent.into();
        let conversation = Conversation::draft(agent.clone(), provider.model_label());
        let (stream_service, stream_rx) = ChatStreamService::new();
        Ok(Self {
            registry,
            provider,
            agent,
            sync,
            store: ConversationStore::new(),
            conversation,
            session: None,
            stream_service,
            stream_rx,
            cancel: CancellationController::new(),
            active_token: None,
        })
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.id()
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn is_active(&self) -> bool {
        self.store.is_active()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(StreamSession::state)
    }

    pub fn synchronizer(&self) -> &PersistenceSynchronizer {
        &self.sync
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.cancel.handle()
    }

    /// Switch providers for subsequent sends. The current conversation keeps
    /// the model label it was created with.
    pub fn set_provider(&mut self, provider_id: ProviderId) -> Result<(), ChatError> {
        if self.is_active() {
            return Err(ChatError::Busy);
        }
        self.provider = self.registry.resolve(provider_id)?;
        if !self.conversation.is_durable() {
            self.conversation.model = self.provider.model_label().to_string();
        }
        Ok(())
    }

    /// Query a different retrieval index from now on. A durable conversation
    /// keeps the agent it was created with.
    pub fn set_agent(&mut self, agent: impl Into<String>) -> Result<(), ChatError> {
        if self.is_active() {
            return Err(ChatError::Busy);
        }
        self.agent = agent.into();
        if !self.conversation.is_durable() {
            self.conversation.agent = self.agent.clone();
        }
        Ok(())
    }

    /// Shared opening of a turn: optimistic user message, lazy conversation
    /// creation, user-message commit. Returns the durable conversation id.
    async fn open_turn(&mut self, query: &str) -> Result<String, ChatError> {
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        if self.is_active() {
            return Err(ChatError::Busy);
        }

        let user_id = self
            .store
            .append_user_message(query, self.conversation.remote_id.clone());

        let conversation_id = match self
            .sync
            .ensure_conversation(&mut self.conversation, query)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "conversation creation failed; rolling back");
                self.store.rollback_last_message();
                return Err(err.into());
            }
        };
        self.store.assign_conversation_id(&conversation_id);

        match self.sync.commit_user_message(&conversation_id, query).await {
            Ok(Message {
                remote_id: Some(remote_id),
                ..
            }) => {
                self.store.mark_durable(user_id, remote_id, &conversation_id);
            }
            Ok(_) => {
                warn!("stored user message has no id");
                self.store.settle_user_message(user_id);
            }
            Err(err) => {
                warn!(error = %err, "user message was not persisted");
                self.store.settle_user_message(user_id);
            }
        }

        Ok(conversation_id)
    }

    /// Submit `query` and open a stream for the answer. Drive the stream with
    /// [`ChatClient::next_event`].
    ///
    /// A provider that cannot stream is refused before anything is written
    /// or sent: only a local notice is added to the store.
    pub async fn send(&mut self, query: &str) -> Result<SendOutcome, ChatError> {
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        if self.is_active() {
            return Err(ChatError::Busy);
        }

        if !self.provider.supports_streaming() {
            info!(provider = %self.provider.id(), "provider cannot stream");
            self.store.push_bot_message(
                UNSUPPORTED_STREAMING_NOTICE,
                MessageStatus::Error,
                Vec::new(),
                self.conversation.remote_id.clone(),
            );
            return Ok(SendOutcome::Failed);
        }

        let (token, stream_id) = self.cancel.start_stream().ok_or(ChatError::Busy)?;
        let conversation_id = match self.open_turn(query).await {
            Ok(id) => id,
            Err(err) => {
                self.cancel.finish(stream_id);
                return Err(err);
            }
        };

        let mut session = StreamSession::new(stream_id, Some(conversation_id));
        session.start(&mut self.store);
        self.session = Some(session);
        self.active_token = Some(token.clone());

        let sink = self.stream_service.sink(stream_id, token);
        let context = QueryContext::new(self.agent.clone());
        if let Err(err) = self.provider.stream_response(query, &context, sink).await {
            warn!(error = %err, stream_id, "stream could not be opened");
            if let Some(session) = self.session.as_mut() {
                session.fail(&mut self.store);
            }
            self.release(stream_id);
            return Ok(SendOutcome::Failed);
        }

        debug!(stream_id, "stream opened");
        Ok(SendOutcome::Streaming { stream_id })
    }

    /// Apply the next event of the streaming session. Returns `None` when
    /// nothing is streaming.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let stream_id = self
            .session
            .as_ref()
            .filter(|session| session.is_streaming())
            .map(StreamSession::stream_id)?;
        let Some(token) = self.active_token.clone() else {
            return Some(self.settle_cancellation());
        };

        loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => return Some(self.settle_cancellation()),
                received = self.stream_rx.recv() => received,
            };

            let Some((message, tagged_id)) = received else {
                return Some(self.dispatch(StreamMessage::Closed).await);
            };
            if tagged_id != stream_id {
                debug!(tagged_id, stream_id, "discarding stale stream event");
                continue;
            }
            return Some(self.dispatch(message).await);
        }
    }

    /// Drive the current stream until it reaches a terminal state.
    pub async fn finish_stream(&mut self) -> Option<ClientEvent> {
        let mut last = None;
        while let Some(event) = self.next_event().await {
            let terminal = event.is_terminal();
            last = Some(event);
            if terminal {
                break;
            }
        }
        last
    }

    async fn dispatch(&mut self, message: StreamMessage) -> ClientEvent {
        let Some(session) = self.session.as_mut() else {
            return ClientEvent::Progress;
        };
        let stream_id = session.stream_id();

        match session.apply(message, &mut self.store) {
            DispatchOutcome::Applied | DispatchOutcome::Ignored => ClientEvent::Progress,
            DispatchOutcome::Errored => {
                self.release(stream_id);
                ClientEvent::Errored
            }
            DispatchOutcome::Completed(answer) => {
                self.release(stream_id);
                let local_id = answer.local_id;
                let commit = self.commit_answer(answer).await;
                ClientEvent::Completed { local_id, commit }
            }
        }
    }

    /// Stop the read loop for `stream_id` and forget its token.
    fn release(&mut self, stream_id: u64) {
        if let Some(token) = self.active_token.take() {
            token.cancel();
        }
        self.cancel.finish(stream_id);
    }

    fn settle_cancellation(&mut self) -> ClientEvent {
        let stream_id = self.session.as_ref().map(StreamSession::stream_id);
        if let Some(session) = self.session.as_mut() {
            session.cancel(&mut self.store);
        }
        if let Some(stream_id) = stream_id {
            self.release(stream_id);
        }
        ClientEvent::Cancelled
    }

    async fn commit_answer(&mut self, answer: FinalAnswer) -> CommitOutcome {
        let Some(conversation_id) = self.conversation.remote_id.clone() else {
            return CommitOutcome::Failed(StorageError::NotFound("conversation id".into()));
        };

        match self
            .sync
            .commit_bot_message(&conversation_id, &answer.text, &answer.sources)
            .await
        {
            Ok(stored) => match stored.remote_id {
                Some(remote_id) => {
                    self.store
                        .mark_durable(answer.local_id, remote_id.clone(), &conversation_id);
                    CommitOutcome::Committed { remote_id }
                }
                None => CommitOutcome::Failed(StorageError::Decode(
                    "stored message has no id".into(),
                )),
            },
            Err(err) => {
                warn!(error = %err, local_id = answer.local_id, "answer was not persisted");
                CommitOutcome::Failed(err)
            }
        }
    }

    /// Interrupt the streaming session. A no-op when nothing is streaming.
    pub fn interrupt(&mut self) -> bool {
        let streaming = self
            .session
            .as_ref()
            .is_some_and(StreamSession::is_streaming);
        if !streaming {
            return false;
        }
        self.cancel.interrupt();
        self.settle_cancellation();
        true
    }

    /// Single-shot generation: the whole answer arrives at once.
    pub async fn ask(&mut self, query: &str) -> Result<LocalMessageId, ChatError> {
        let conversation_id = self.open_turn(query).await?;

        self.store.set_activity(Some(Activity::AwaitingAnswer));
        let context = QueryContext::new(self.agent.clone());
        let result = self.provider.generate_response(query, &context).await;
        self.store.set_activity(None);

        match result {
            Ok(answer) => {
                let local_id = self.store.push_bot_message(
                    answer.text.clone(),
                    MessageStatus::Success,
                    answer.sources.clone(),
                    Some(conversation_id),
                );
                let commit = self
                    .commit_answer(FinalAnswer {
                        local_id,
                        text: answer.text,
                        sources: answer.sources,
                    })
                    .await;
                if let CommitOutcome::Failed(err) = commit {
                    debug!(error = %err, "single-shot answer kept locally");
                }
                Ok(local_id)
            }
            Err(err) => {
                warn!(error = %err, "single-shot generation failed");
                Ok(self.store.push_bot_message(
                    SINGLE_SHOT_FAILURE_NOTICE,
                    MessageStatus::Error,
                    Vec::new(),
                    Some(conversation_id),
                ))
            }
        }
    }

    /// Start a fresh, not yet durable conversation.
    pub fn new_conversation(&mut self) -> Result<(), ChatError> {
        if self.is_active() {
            return Err(ChatError::Busy);
        }
        self.store.clear();
        self.session = None;
        self.conversation = Conversation::draft(self.agent.clone(), self.provider.model_label());
        Ok(())
    }

    /// Replace the store with a stored conversation's history.
    pub async fn load_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        if self.is_active() {
            return Err(ChatError::Busy);
        }
        let conversation = self
            .sync
            .list_conversations()
            .await?
            .into_iter()
            .find(|c| c.remote_id.as_deref() == Some(conversation_id))
            .ok_or_else(|| StorageError::NotFound(format!("conversation {conversation_id}")))?;
        let history = self.sync.load_history(conversation_id).await?;

        self.session = None;
        self.store.replace_all(history);
        self.agent = conversation.agent.clone();
        self.conversation = conversation;
        Ok(())
    }

    /// Delete the conversation in view. Without a durable id only local
    /// state is cleared.
    pub async fn delete_current(&mut self) -> Result<(), ChatError> {
        if self.is_active() {
            return Err(ChatError::Busy);
        }
        if let Some(id) = self.conversation.remote_id.clone() {
            self.sync.delete_conversation(&id).await?;
        }
        self.new_conversation()
    }

    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        if self.conversation.remote_id.as_deref() == Some(conversation_id) {
            return self.delete_current().await;
        }
        self.sync.delete_conversation(conversation_id).await?;
        Ok(())
    }
}
