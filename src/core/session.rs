//! Per-answer stream session and the chunk dispatcher that drives it.

use tracing::{debug, info, warn};

use crate::api::SourceRef;
use crate::core::chat_stream::{StreamChunk, StreamMessage};
use crate::core::message::{LocalMessageId, MessageStatus};
use crate::core::store::{Activity, ConversationStore};

pub const STREAM_FAILURE_NOTICE: &str = "Streaming failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Cancelled
        )
    }
}

/// The assembled answer handed to persistence when a stream completes.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub local_id: LocalMessageId,
    pub text: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The chunk was applied and the session keeps streaming.
    Applied,
    /// Nothing changed: unknown kind, or the session is no longer streaming.
    Ignored,
    Completed(FinalAnswer),
    Errored,
}

#[derive(Debug)]
pub struct StreamSession {
    stream_id: u64,
    conversation_id: Option<String>,
    state: SessionState,
    in_progress: Option<LocalMessageId>,
    accumulated_text: String,
    accumulated_sources: Vec<SourceRef>,
}

impl StreamSession {
    pub fn new(stream_id: u64, conversation_id: Option<String>) -> Self {
        Self {
            stream_id,
            conversation_id,
            state: SessionState::Idle,
            in_progress: None,
            accumulated_text: String::new(),
            accumulated_sources: Vec::new(),
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn in_progress_message(&self) -> Option<LocalMessageId> {
        self.in_progress
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn accumulated_sources(&self) -> &[SourceRef] {
        &self.accumulated_sources
    }

    /// `Idle -> Streaming`. Raises the store's activity flag.
    pub fn start(&mut self, store: &mut ConversationStore) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Streaming;
        store.set_activity(Some(Activity::Streaming));
        debug!(stream_id = self.stream_id, "session streaming");
        true
    }

    fn ensure_message(&mut self, store: &mut ConversationStore) -> Option<LocalMessageId> {
        if let Some(local_id) = self.in_progress {
            return Some(local_id);
        }
        let local_id = store.begin_bot_message(self.conversation_id.clone())?;
        self.in_progress = Some(local_id);
        Some(local_id)
    }

    fn transition(&mut self, next: SessionState, store: &mut ConversationStore) {
        info!(stream_id = self.stream_id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        store.set_activity(None);
    }

    /// Apply one message from the transport. Terminal sessions ignore
    /// everything.
    pub fn apply(&mut self, message: StreamMessage, store: &mut ConversationStore) -> DispatchOutcome {
        if !self.is_streaming() {
            debug!(stream_id = self.stream_id, state = ?self.state, "dropping message for inactive session");
            return DispatchOutcome::Ignored;
        }

        match message {
            StreamMessage::Chunk(chunk) => self.apply_chunk(chunk, store),
            StreamMessage::Closed => {
                warn!(stream_id = self.stream_id, "stream closed before an end chunk");
                self.fail(store);
                DispatchOutcome::Errored
            }
        }
    }

    fn apply_chunk(&mut self, chunk: StreamChunk, store: &mut ConversationStore) -> DispatchOutcome {
        match chunk {
            StreamChunk::Sources(sources) => {
                let Some(local_id) = self.ensure_message(store) else {
                    return DispatchOutcome::Ignored;
                };
                self.accumulated_sources = sources.clone();
                store.attach_sources(local_id, sources);
                DispatchOutcome::Applied
            }
            StreamChunk::Markdown(content) => {
                let Some(local_id) = self.ensure_message(store) else {
                    return DispatchOutcome::Ignored;
                };
                self.accumulated_text.push_str(&content);
                store.append_bot_delta(local_id, &content);
                DispatchOutcome::Applied
            }
            StreamChunk::Error(detail) => {
                if let Some(detail) = detail {
                    warn!(stream_id = self.stream_id, %detail, "backend reported a stream error");
                }
                self.fail(store);
                DispatchOutcome::Errored
            }
            StreamChunk::End => {
                let Some(local_id) = self.ensure_message(store) else {
                    self.transition(SessionState::Errored, store);
                    return DispatchOutcome::Errored;
                };
                store.finalize_bot_message(local_id, MessageStatus::Success);
                self.transition(SessionState::Completed, store);
                DispatchOutcome::Completed(FinalAnswer {
                    local_id,
                    text: self.accumulated_text.clone(),
                    sources: self.accumulated_sources.clone(),
                })
            }
            StreamChunk::Unknown(kind) => {
                warn!(stream_id = self.stream_id, %kind, "ignoring unknown chunk kind");
                DispatchOutcome::Ignored
            }
        }
    }

    /// Move to `Errored`, leaving one bot message with the failure notice.
    pub fn fail(&mut self, store: &mut ConversationStore) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(local_id) = self.ensure_message(store) {
            let notice = if self.accumulated_text.is_empty() {
                STREAM_FAILURE_NOTICE.to_string()
            } else {
                format!("\n\n{STREAM_FAILURE_NOTICE}")
            };
            store.append_bot_delta(local_id, &notice);
            store.finalize_bot_message(local_id, MessageStatus::Error);
        }
        self.transition(SessionState::Errored, store);
    }

    /// `Streaming -> Cancelled`. Partial text stays visible but is never
    /// committed. Returns `false` when there was nothing to cancel.
    pub fn cancel(&mut self, store: &mut ConversationStore) -> bool {
        if !self.is_streaming() {
            return false;
        }
        if let Some(local_id) = self.in_progress {
            store.finalize_bot_message(local_id, MessageStatus::Success);
        }
        self.transition(SessionState::Cancelled, store);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Sender;

    fn streaming_session(store: &mut ConversationStore) -> StreamSession {
        let mut session = StreamSession::new(1, Some("conv".into()));
        assert!(session.start(store));
        session
    }

    fn chunk(chunk: StreamChunk) -> StreamMessage {
        StreamMessage::Chunk(chunk)
    }

    fn bot_messages(store: &ConversationStore) -> usize {
        store.transcript().filter(|m| m.sender == Sender::Bot).count()
    }

    #[test]
    fn markdown_chunks_concatenate_in_arrival_order() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        let parts = ["The ", "quick ", "", "brown ", "fox."];
        for part in parts {
            assert_eq!(
                session.apply(chunk(StreamChunk::Markdown(part.into())), &mut store),
                DispatchOutcome::Applied
            );
        }

        let outcome = session.apply(chunk(StreamChunk::End), &mut store);
        let DispatchOutcome::Completed(answer) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(answer.text, parts.concat());
        assert_eq!(store.messages().last().expect("bot").text, parts.concat());
        assert_eq!(bot_messages(&store), 1);
    }

    #[test]
    fn sources_position_does_not_matter() {
        let sources = vec![SourceRef::new("a", "A", "p"), SourceRef::new("b", "B", "q")];
        for position in 0..=2 {
            let mut store = ConversationStore::new();
            let mut session = streaming_session(&mut store);
            let mut sequence = vec![
                StreamChunk::Markdown("one ".into()),
                StreamChunk::Markdown("two".into()),
            ];
            sequence.insert(position, StreamChunk::Sources(sources.clone()));
            for item in sequence {
                session.apply(chunk(item), &mut store);
            }
            session.apply(chunk(StreamChunk::End), &mut store);

            let bot = store.messages().last().expect("bot");
            assert_eq!(bot.sources, sources);
            assert_eq!(bot.text, "one two");
            assert_eq!(bot_messages(&store), 1);
        }
    }

    #[test]
    fn error_chunk_marks_message_and_stops_processing() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        session.apply(chunk(StreamChunk::Markdown("Partial".into())), &mut store);

        assert_eq!(
            session.apply(chunk(StreamChunk::Error(Some("boom".into()))), &mut store),
            DispatchOutcome::Errored
        );
        assert_eq!(session.state(), SessionState::Errored);
        assert!(!store.is_active());

        let bot = store.messages().last().expect("bot");
        assert_eq!(bot.status, MessageStatus::Error);
        assert_eq!(bot.text, format!("Partial\n\n{STREAM_FAILURE_NOTICE}"));

        assert_eq!(
            session.apply(chunk(StreamChunk::Markdown("more".into())), &mut store),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            session.apply(chunk(StreamChunk::End), &mut store),
            DispatchOutcome::Ignored
        );
        assert_eq!(bot_messages(&store), 1);
    }

    #[test]
    fn error_before_any_text_creates_a_notice_message() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        session.apply(chunk(StreamChunk::Error(None)), &mut store);

        let bot = store.messages().last().expect("bot");
        assert_eq!(bot.text, STREAM_FAILURE_NOTICE);
        assert_eq!(bot.status, MessageStatus::Error);
    }

    #[test]
    fn unknown_kind_is_ignored_without_transition() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        assert_eq!(
            session.apply(chunk(StreamChunk::Unknown("thinking".into())), &mut store),
            DispatchOutcome::Ignored
        );
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(store.is_active());
        assert!(store.in_progress().is_none());
    }

    #[test]
    fn close_without_end_is_treated_as_failure() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        session.apply(chunk(StreamChunk::Markdown("Hi".into())), &mut store);
        assert_eq!(
            session.apply(StreamMessage::Closed, &mut store),
            DispatchOutcome::Errored
        );
        assert_eq!(
            store.messages().last().expect("bot").status,
            MessageStatus::Error
        );
    }

    #[test]
    fn end_without_content_still_yields_one_message() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        let outcome = session.apply(chunk(StreamChunk::End), &mut store);
        assert!(matches!(outcome, DispatchOutcome::Completed(_)));
        assert_eq!(bot_messages(&store), 1);
        assert_eq!(
            store.messages()[0].status,
            MessageStatus::Success
        );
    }

    #[test]
    fn cancel_keeps_partial_text_and_absorbs_late_chunks() {
        let mut store = ConversationStore::new();
        let mut session = streaming_session(&mut store);
        session.apply(chunk(StreamChunk::Markdown("Hel".into())), &mut store);

        assert!(session.cancel(&mut store));
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!store.is_active());

        assert_eq!(
            session.apply(chunk(StreamChunk::Markdown("lo".into())), &mut store),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            session.apply(chunk(StreamChunk::End), &mut store),
            DispatchOutcome::Ignored
        );
        let bot = store.messages().last().expect("bot");
        assert_eq!(bot.text, "Hel");
        assert!(!bot.is_streaming);
        assert!(!session.cancel(&mut store));
    }

    #[test]
    fn idle_session_ignores_chunks() {
        let mut store = ConversationStore::new();
        let mut session = StreamSession::new(1, None);
        assert_eq!(
            session.apply(chunk(StreamChunk::Markdown("x".into())), &mut store),
            DispatchOutcome::Ignored
        );
        assert!(store.is_empty());
    }
}
