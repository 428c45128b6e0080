use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A citation returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content_preview: String,
}

impl SourceRef {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content_preview: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content_preview: content_preview.into(),
        }
    }
}

/// Body for both the single-shot and the streaming query endpoints.
#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
    pub index_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub source_documents: Vec<SourceRef>,
}

/// One streaming frame exactly as it arrives on the wire.
///
/// The reference backend ships the `sources` list inside `content`, so
/// `content` is kept as a raw value and interpreted per kind.
#[derive(Debug, Deserialize)]
pub struct WireChunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub sources: Option<Vec<SourceRef>>,
}

#[derive(Serialize)]
pub struct OpenAiMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Serialize)]
pub struct OpenAiRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Deserialize)]
pub struct OpenAiResponseMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
pub struct OpenAiResponse {
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Serialize)]
pub struct GeminiPart<'a> {
    pub text: &'a str,
}

#[derive(Serialize)]
pub struct GeminiContent<'a> {
    pub parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
pub struct GeminiRequest<'a> {
    pub contents: Vec<GeminiContent<'a>>,
}

#[derive(Deserialize)]
pub struct GeminiResponsePart {
    pub text: Option<String>,
}

#[derive(Deserialize)]
pub struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
pub struct GeminiCandidate {
    pub content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

impl GeminiResponse {
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        Some(text)
    }
}
