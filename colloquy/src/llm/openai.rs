//! OpenAI chat models, plus any OpenAI-compatible endpoint (used for the
//! per-course `custom-` keys).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::llm::wire::ChatCompletionsEndpoint;
use crate::llm::ChatClient;
use crate::stream::MessageChunk;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI chat completions.
#[derive(Debug)]
pub struct OpenAiChat {
    endpoint: ChatCompletionsEndpoint,
    provider: &'static str,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::compatible(OPENAI_BASE_URL, api_key, model)
    }

    /// Points the client at any OpenAI-compatible base URL.
    pub fn compatible(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: ChatCompletionsEndpoint::new(base_url, api_key, model),
            provider: "OpenAI",
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiChat {
    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        self.endpoint
            .complete(self.provider, prompt, temperature)
            .await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        self.endpoint
            .complete_stream(self.provider, prompt, temperature, chunk_tx)
            .await
    }
}
