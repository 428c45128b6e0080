//! Hosted third-party APIs. These answer in one shot only; streaming falls
//! through to the trait default and fails with `NotSupported`.

use async_trait::async_trait;
use tracing::debug;

use super::{ensure_success, Answer, GenerationProvider, ProviderError, ProviderId, QueryContext};
use crate::api::{
    GeminiContent, GeminiPart, GeminiRequest, GeminiResponse, OpenAiMessage, OpenAiRequest,
    OpenAiResponse,
};
use crate::utils::url::construct_api_url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    settings: HostedSettings,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, settings: HostedSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn model_label(&self) -> &str {
        &self.settings.model
    }

    async fn generate_response(
        &self,
        query: &str,
        _context: &QueryContext,
    ) -> Result<Answer, ProviderError> {
        let url = construct_api_url(&self.settings.base_url, "chat/completions");
        debug!(%url, model = %self.settings.model, "sending hosted completion");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .json(&OpenAiRequest {
                model: &self.settings.model,
                messages: vec![OpenAiMessage {
                    role: "user",
                    content: query,
                }],
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: OpenAiResponse = response.json().await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyAnswer);
        }

        Ok(Answer {
            text,
            sources: Vec::new(),
        })
    }
}

pub struct GeminiProvider {
    client: reqwest::Client,
    settings: HostedSettings,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, settings: HostedSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model_label(&self) -> &str {
        &self.settings.model
    }

    async fn generate_response(
        &self,
        query: &str,
        _context: &QueryContext,
    ) -> Result<Answer, ProviderError> {
        let endpoint = format!("models/{}:generateContent", self.settings.model);
        let url = construct_api_url(&self.settings.base_url, &endpoint);
        debug!(%url, "sending hosted generateContent");

        let response = self
            .client
            .post(url)
            .query(&[("key", self.settings.api_key.as_str())])
            .json(&GeminiRequest {
                contents: vec![GeminiContent {
                    parts: vec![GeminiPart { text: query }],
                }],
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: GeminiResponse = response.json().await?;

        match body.first_text() {
            Some(text) if !text.trim().is_empty() => Ok(Answer {
                text,
                sources: Vec::new(),
            }),
            _ => Err(ProviderError::EmptyAnswer),
        }
    }
}
