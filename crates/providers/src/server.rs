//! Client for the llmcode routing server.
//!
//! Endpoints (all under `{server_url}/api/v1`, authenticated with
//! `X-API-Key`):
//! - `POST /chat` and `POST /summarize`: SSE token streams
//! - `POST /embed`: JSON embeddings, at most 100 texts per call
//! - `GET /health`, `GET /models`
//!
//! Streaming responses are read by a spawned task that feeds the
//! returned [`CompletionStream`]. Cancelling the stream stops the task,
//! which drops the response and closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use llmcode_config::AppConfig;
use llmcode_core::provider::MAX_EMBED_BATCH;
use llmcode_core::{
    CompletionRequest, CompletionStream, EmbeddingRequest, EmbeddingResponse, ErrorCode, Provider,
    ProviderError, StreamEvent, SummaryRequest,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sse::{LineDecoder, parse_line};

pub struct ServerClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new(&config.server_url, config.api_key.clone())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v1/{endpoint}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(endpoint));
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    /// Send a request and turn any non-2xx status into `ProviderError::Api`.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Server returned an error");
        Err(ProviderError::Api {
            code: ErrorCode::from_status(status.as_u16()),
            message: error_message(&body).unwrap_or_else(|| status.to_string()),
        })
    }

    /// POST `body` to a streaming endpoint and hand back its event stream.
    async fn open_stream(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<CompletionStream, ProviderError> {
        let builder = self
            .request(reqwest::Method::POST, endpoint)
            .header("Accept", "text/event-stream")
            .json(&body);
        let response = self.send(builder).await?;

        let (sender, stream) = CompletionStream::channel(64);
        let endpoint = endpoint.to_string();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = LineDecoder::default();

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = sender.cancelled() => {
                        debug!(endpoint, "Stream cancelled by consumer");
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                let lines = match chunk {
                    Some(Ok(b)) => decoder.push(&b),
                    Some(Err(e)) => {
                        let _ = sender
                            .send(StreamEvent::error(ErrorCode::UpstreamFailure, e.to_string()))
                            .await;
                        return;
                    }
                    None => {
                        // Body ended; a trailing line without newline may
                        // still hold the terminal event.
                        if let Some(event) = decoder.finish().as_deref().and_then(parse_line) {
                            let terminal = event.is_terminal();
                            if !sender.send(event).await || terminal {
                                return;
                            }
                        }
                        let _ = sender
                            .send(StreamEvent::error(
                                ErrorCode::UpstreamFailure,
                                "stream ended before completion",
                            ))
                            .await;
                        return;
                    }
                };

                for line in lines {
                    let Some(event) = parse_line(&line) else {
                        continue;
                    };
                    let terminal = event.is_terminal();
                    if !sender.send(event).await || terminal {
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    /// Raw `/health` payload.
    pub async fn health(&self) -> Result<serde_json::Value, ProviderError> {
        let response = self.send(self.request(reqwest::Method::GET, "health")).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    /// Model names the server can route to.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        #[derive(Deserialize)]
        struct Models {
            #[serde(default)]
            models: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ModelEntry {
            Named { name: String },
            Bare(String),
        }

        let response = self.send(self.request(reqwest::Method::GET, "models")).await?;
        let models: Models = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(models
            .models
            .into_iter()
            .map(|m| match m {
                ModelEntry::Named { name } => name,
                ModelEntry::Bare(name) => name,
            })
            .collect())
    }
}

/// Pull a message out of `{"detail":{"error":{"code","message"}}}` or
/// `{"error":{...}}` error bodies.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value
        .pointer("/detail/error")
        .or_else(|| value.get("error"))?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[async_trait]
impl Provider for ServerClient {
    fn name(&self) -> &str {
        "server"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError> {
        debug!(
            model = %request.options.model,
            messages = request.messages.len(),
            "Sending chat request"
        );
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        self.open_stream("chat", body).await
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if request.texts.is_empty() || request.texts.len() > MAX_EMBED_BATCH {
            return Err(ProviderError::Api {
                code: ErrorCode::MalformedRequest,
                message: format!("embed batch must hold 1..={MAX_EMBED_BATCH} texts"),
            });
        }

        let builder = self.request(reqwest::Method::POST, "embed").json(&request);
        let response = self.send(builder).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if parsed.embeddings.len() != request.texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                request.texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed)
    }

    async fn summarize(&self, request: SummaryRequest) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "file": {
                "path": request.path,
                "content": request.content,
                "language": request.language,
            },
            "options": {
                "model": request.model,
                "max_length": request.max_length,
            },
        });
        let (text, _usage) = self.open_stream("summarize", body).await?.collect_text().await?;
        Ok(text.trim().to_string())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        match self.health().await {
            Ok(_) => Ok(true),
            Err(ProviderError::Network(_)) | Err(ProviderError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
