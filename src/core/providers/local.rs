use async_trait::async_trait;
use tracing::debug;

use super::{ensure_success, Answer, GenerationProvider, ProviderError, ProviderId, QueryContext};
use crate::api::{QueryRequest, QueryResponse};
use crate::core::chat_stream::StreamSink;
use crate::utils::url::construct_api_url;

/// The self-hosted retrieval backend. Supports both answer modes.
pub struct LocalLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalLlmProvider {
    pub fn new(client: reqwest::Client, base_url: String, model: String) -> Self {
        Self {
            client,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl GenerationProvider for LocalLlmProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    fn model_label(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate_response(
        &self,
        query: &str,
        context: &QueryContext,
    ) -> Result<Answer, ProviderError> {
        let url = construct_api_url(&self.base_url, "api/v1/query");
        debug!(%url, agent = %context.agent, "sending single-shot query");

        let response = self
            .client
            .post(url)
            .json(&QueryRequest {
                query,
                index_name: &context.agent,
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: QueryResponse = response.json().await?;

        if body.answer.trim().is_empty() {
            return Err(ProviderError::EmptyAnswer);
        }

        Ok(Answer {
            text: body.answer,
            sources: body.source_documents,
        })
    }

    async fn stream_response(
        &self,
        query: &str,
        context: &QueryContext,
        sink: StreamSink,
    ) -> Result<(), ProviderError> {
        let request = self
            .client
            .post(construct_api_url(&self.base_url, "api/v1/query/stream"))
            .json(&QueryRequest {
                query,
                index_name: &context.agent,
            });
        let stream_id = sink.stream_id();

        tokio::spawn(async move {
            let cancel_token = sink.cancel_token().clone();
            let response = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return,
                response = request.send() => response,
            };

            match response {
                Ok(response) => match ensure_success(response).await {
                    Ok(response) => {
                        debug!(stream_id, "stream opened");
                        sink.pump(response.bytes_stream()).await;
                    }
                    Err(err) => sink.fail(err.to_string()),
                },
                Err(err) => sink.fail(err.to_string()),
            }
        });

        Ok(())
    }
}
