//! Generation providers and the registry that hands them out.
//!
//! A provider answers a query either in one shot or, when it supports it,
//! by streaming protocol chunks into a [`StreamSink`]. The registry is built
//! once from configuration and caches one instance per [`ProviderId`], so a
//! handle resolved twice is the same provider.

pub mod hosted;
pub mod local;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::SourceRef;
use crate::core::chat_stream::StreamSink;
use crate::core::config::data::Config;

pub use hosted::{GeminiProvider, HostedSettings, OpenAiProvider};
pub use local::LocalLlmProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Local,
    OpenAi,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Local, ProviderId::OpenAi, ProviderId::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Local => "local",
            ProviderId::OpenAi => "openai",
            ProviderId::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderId::Local => "Local inference backend",
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Gemini => "Google Gemini",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "local_llm" => Ok(ProviderId::Local),
            "openai" => Ok(ProviderId::OpenAi),
            "gemini" => Ok(ProviderId::Gemini),
            _ => Err(ProviderError::UnknownProvider(value.to_string())),
        }
    }
}

/// Per-request context forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    /// Retrieval index (data source) the answer should be grounded in.
    pub agent: String,
}

impl QueryContext {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug)]
pub enum ProviderError {
    /// The provider only answers in one shot.
    NotSupported { provider: ProviderId },
    /// A hosted provider was requested without credentials.
    NotConfigured { provider: ProviderId },
    UnknownProvider(String),
    Transport(reqwest::Error),
    Status { status: u16, body: String },
    Decode(String),
    EmptyAnswer,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotSupported { provider } => {
                write!(f, "provider '{provider}' does not support streaming responses")
            }
            ProviderError::NotConfigured { provider } => {
                write!(f, "provider '{provider}' has no API key configured")
            }
            ProviderError::UnknownProvider(name) => write!(f, "unknown provider: {name}"),
            ProviderError::Transport(err) => write!(f, "request failed: {err}"),
            ProviderError::Status { status, body } => {
                write!(f, "backend returned status {status}: {}", body.trim())
            }
            ProviderError::Decode(detail) => write!(f, "unreadable backend response: {detail}"),
            ProviderError::EmptyAnswer => f.write_str("backend returned an empty answer"),
        }
    }
}

impl Error for ProviderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProviderError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err)
        }
    }
}

/// Turn a non-2xx response into [`ProviderError::Status`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Label recorded on conversations created through this provider.
    fn model_label(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn generate_response(
        &self,
        query: &str,
        context: &QueryContext,
    ) -> Result<Answer, ProviderError>;

    /// Start streaming an answer into `sink`.
    ///
    /// Returns once the stream has been handed off; chunks, transport
    /// failures and the final close all arrive through the sink. Providers
    /// without streaming fail here before touching the network.
    async fn stream_response(
        &self,
        query: &str,
        context: &QueryContext,
        sink: StreamSink,
    ) -> Result<(), ProviderError> {
        let _ = (query, context, sink);
        Err(ProviderError::NotSupported {
            provider: self.id(),
        })
    }
}

/// Everything needed to construct providers on demand.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub backend_url: String,
    pub local_model: String,
    pub openai: Option<HostedSettings>,
    pub gemini: Option<HostedSettings>,
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend_url: config.backend_url(),
            local_model: config.local_model(),
            openai: config.openai_settings(),
            gemini: config.gemini_settings(),
        }
    }
}

pub struct ProviderRegistry {
    client: reqwest::Client,
    settings: ProviderSettings,
    providers: Mutex<HashMap<ProviderId, Arc<dyn GenerationProvider>>>,
}

impl ProviderRegistry {
    pub fn new(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self {
            client,
            settings,
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Install a provider instance, replacing whatever was cached for `id`.
    pub fn register(&self, id: ProviderId, provider: Arc<dyn GenerationProvider>) {
        let mut providers = self
            .providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.insert(id, provider);
    }

    pub fn resolve(&self, id: ProviderId) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
        let mut providers = self
            .providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = providers.get(&id) {
            return Ok(Arc::clone(existing));
        }

        let provider = self.build(id)?;
        providers.insert(id, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn is_configured(&self, id: ProviderId) -> bool {
        match id {
            ProviderId::Local => true,
            ProviderId::OpenAi => self.settings.openai.is_some(),
            ProviderId::Gemini => self.settings.gemini.is_some(),
        }
    }

    fn build(&self, id: ProviderId) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
        let provider: Arc<dyn GenerationProvider> = match id {
            ProviderId::Local => Arc::new(LocalLlmProvider::new(
                self.client.clone(),
                self.settings.backend_url.clone(),
                self.settings.local_model.clone(),
            )),
            ProviderId::OpenAi => {
                let settings = self
                    .settings
                    .openai
                    .clone()
                    .ok_or(ProviderError::NotConfigured { provider: id })?;
                Arc::new(OpenAiProvider::new(self.client.clone(), settings))
            }
            ProviderId::Gemini => {
                let settings = self
                    .settings
                    .gemini
                    .clone()
                    .ok_or(ProviderError::NotConfigured { provider: id })?;
                Arc::new(GeminiProvider::new(self.client.clone(), settings))
            }
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProviderSettings {
        ProviderSettings {
            backend_url: "http://127.0.0.1:9".into(),
            local_model: "llama3".into(),
            openai: None,
            gemini: Some(HostedSettings {
                api_key: "g-key".into(),
                base_url: "http://127.0.0.1:9".into(),
                model: "gemini-pro".into(),
            }),
        }
    }

    #[test]
    fn provider_ids_parse_case_insensitively() {
        assert_eq!("LOCAL".parse::<ProviderId>().ok(), Some(ProviderId::Local));
        assert_eq!("local_llm".parse::<ProviderId>().ok(), Some(ProviderId::Local));
        assert_eq!("Gemini".parse::<ProviderId>().ok(), Some(ProviderId::Gemini));
        assert!(matches!(
            "claude".parse::<ProviderId>(),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn resolving_twice_returns_the_same_instance() {
        let registry = ProviderRegistry::new(reqwest::Client::new(), settings());
        let first = registry.resolve(ProviderId::Local).expect("local");
        let second = registry.resolve(ProviderId::Local).expect("local");
        assert!(Arc::ptr_eq(&first, &second));

        let gemini = registry.resolve(ProviderId::Gemini).expect("gemini");
        assert!(!Arc::ptr_eq(&first, &gemini));
        assert!(Arc::ptr_eq(
            &gemini,
            &registry.resolve(ProviderId::Gemini).expect("gemini")
        ));
    }

    #[test]
    fn unconfigured_hosted_provider_is_rejected() {
        let registry = ProviderRegistry::new(reqwest::Client::new(), settings());
        assert!(!registry.is_configured(ProviderId::OpenAi));
        assert!(matches!(
            registry.resolve(ProviderId::OpenAi),
            Err(ProviderError::NotConfigured {
                provider: ProviderId::OpenAi
            })
        ));
    }

    #[tokio::test]
    async fn hosted_provider_refuses_to_stream_without_network() {
        let registry = ProviderRegistry::new(reqwest::Client::new(), settings());
        let gemini = registry.resolve(ProviderId::Gemini).expect("gemini");
        assert!(!gemini.supports_streaming());

        let (service, mut rx) = crate::core::chat_stream::ChatStreamService::new();
        let sink = service.sink(1, tokio_util::sync::CancellationToken::new());
        let result = gemini
            .stream_response("hi", &QueryContext::new("nextjs"), sink)
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::NotSupported {
                provider: ProviderId::Gemini
            })
        ));
        assert!(rx.try_recv().is_err());
    }
}
