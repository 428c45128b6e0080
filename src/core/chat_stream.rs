use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{SourceRef, WireChunk};

/// A classified protocol chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamChunk {
    Sources(Vec<SourceRef>),
    Markdown(String),
    /// Backend- or transport-reported failure. The detail is for logs only.
    Error(Option<String>),
    End,
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Chunk(StreamChunk),
    /// The byte source is exhausted; nothing follows for this stream id.
    Closed,
}

pub type TaggedStreamMessage = (StreamMessage, u64);

/// Incremental UTF-8 decoder that carries incomplete trailing sequences
/// over to the next read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut decoded = String::with_capacity(self.carry.len());

        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    decoded.push_str(text);
                    self.carry.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.carry[..valid_up_to]) {
                        decoded.push_str(prefix);
                    }
                    match err.error_len() {
                        // Incomplete sequence at the end: keep it for the next read.
                        None => {
                            self.carry.drain(..valid_up_to);
                            break;
                        }
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }

        decoded
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.carry.is_empty()
    }
}

fn sources_from_content(content: Option<Value>) -> Vec<SourceRef> {
    match content {
        Some(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(error = %err, "sources chunk carried an unreadable list");
            Vec::new()
        }),
        _ => Vec::new(),
    }
}

fn content_string(content: Option<Value>) -> Option<String> {
    match content {
        Some(Value::String(text)) => Some(text),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

impl From<WireChunk> for StreamChunk {
    fn from(wire: WireChunk) -> Self {
        match wire.kind.as_str() {
            "sources" => {
                let sources = match wire.sources {
                    Some(list) => list,
                    None => sources_from_content(wire.content),
                };
                StreamChunk::Sources(sources)
            }
            "markdown" => StreamChunk::Markdown(content_string(wire.content).unwrap_or_default()),
            "error" => StreamChunk::Error(content_string(wire.content)),
            "end" => StreamChunk::End,
            _ => StreamChunk::Unknown(wire.kind),
        }
    }
}

/// Parse one frame. Malformed frames are logged and dropped.
pub fn parse_frame(frame: &str) -> Option<StreamChunk> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<WireChunk>(trimmed) {
        Ok(wire) => Some(wire.into()),
        Err(err) => {
            warn!(error = %err, frame = trimmed, "dropping malformed stream frame");
            None
        }
    }
}

/// Split one transport flush into chunks.
///
/// A flush normally holds a single JSON document. When the transport
/// coalesces several newline-terminated documents into one read, each line
/// is parsed on its own; nothing is buffered across reads.
pub fn parse_flush(flush: &str) -> Vec<StreamChunk> {
    if let Some(chunk) = parse_whole(flush) {
        return vec![chunk];
    }

    if !flush.trim().contains('\n') {
        return parse_frame(flush).into_iter().collect();
    }

    flush.lines().filter_map(parse_frame).collect()
}

fn parse_whole(flush: &str) -> Option<StreamChunk> {
    let trimmed = flush.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<WireChunk>(trimmed)
        .ok()
        .map(StreamChunk::from)
}

/// Producer half handed to a provider for one stream.
#[derive(Clone, Debug)]
pub struct StreamSink {
    tx: mpsc::UnboundedSender<TaggedStreamMessage>,
    stream_id: u64,
    cancel_token: CancellationToken,
}

impl StreamSink {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Deliver a message unless the stream was cancelled. Returns `false`
    /// once nothing more should be sent.
    pub fn send(&self, message: StreamMessage) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        self.tx.send((message, self.stream_id)).is_ok()
    }

    /// Synthesize a local error chunk and close the stream.
    pub fn fail(&self, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(stream_id = self.stream_id, detail = %detail, "stream transport failed");
        if self.send(StreamMessage::Chunk(StreamChunk::Error(Some(detail)))) {
            self.send(StreamMessage::Closed);
        }
    }

    /// Read the byte source to completion, forwarding one chunk per frame.
    ///
    /// Cancellation is checked before every read and before every delivery,
    /// so nothing is sent once the token fires.
    pub async fn pump<S, B, E>(self, source: S)
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut decoder = FrameDecoder::new();
        futures_util::pin_mut!(source);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    debug!(stream_id = self.stream_id, "stream read loop cancelled");
                    return;
                }
                next = source.next() => next,
            };

            match next {
                None => {
                    if decoder.has_pending_bytes() {
                        warn!(stream_id = self.stream_id, "stream ended inside a UTF-8 sequence");
                    }
                    self.send(StreamMessage::Closed);
                    return;
                }
                Some(Err(err)) => {
                    self.fail(err.to_string());
                    return;
                }
                Some(Ok(bytes)) => {
                    let text = decoder.decode(bytes.as_ref());
                    for chunk in parse_flush(&text) {
                        if !self.send(StreamMessage::Chunk(chunk)) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Owns the shared event channel that every stream reports into.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<TaggedStreamMessage>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaggedStreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn sink(&self, stream_id: u64, cancel_token: CancellationToken) -> StreamSink {
        StreamSink {
            tx: self.tx.clone(),
            stream_id,
            cancel_token,
        }
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}
