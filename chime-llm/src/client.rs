use crate::error::{LlmError, Result};
use crate::openai;
use crate::types::{Completion, CompletionRequest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Text-completion seam consumed by the engine. Production code wires in
/// [`LlmClient`]; tests script their own backends.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a non-default OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.base_url = trimmed.to_string();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl CompletionBackend for LlmClient {
    #[tracing::instrument(level = "info", skip_all)]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if request.prompt.trim().is_empty() {
            return Err(LlmError::InvalidInput("prompt must not be empty".into()));
        }
        openai::chat_completion(&self.http, &self.base_url, &self.api_key, &self.model, request)
            .await
    }
}
