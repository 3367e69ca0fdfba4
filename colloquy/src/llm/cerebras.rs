//! Cerebras chat models through their OpenAI-compatible endpoint.
//!
//! Qwen models on Cerebras emit a visible reasoning preamble unless the
//! prompt carries the `/no_think` directive, so every prompt gets the suffix.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::llm::wire::ChatCompletionsEndpoint;
use crate::llm::ChatClient;
use crate::stream::MessageChunk;

const CEREBRAS_BASE_URL: &str = "https://api.cerebras.ai/v1";
const NO_THINK_SUFFIX: &str = " /no_think";

/// Client for Cerebras-hosted chat models.
#[derive(Debug)]
pub struct CerebrasChat {
    endpoint: ChatCompletionsEndpoint,
}

impl CerebrasChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: ChatCompletionsEndpoint::new(CEREBRAS_BASE_URL, api_key, model),
        }
    }

    fn with_suffix(prompt: &str) -> String {
        format!("{prompt}{NO_THINK_SUFFIX}")
    }
}

#[async_trait]
impl ChatClient for CerebrasChat {
    fn model(&self) -> &str {
        &self.endpoint.model
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        self.endpoint
            .complete("Cerebras", &Self::with_suffix(prompt), temperature)
            .await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        self.endpoint
            .complete_stream("Cerebras", &Self::with_suffix(prompt), temperature, chunk_tx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Every prompt picks up the `/no_think` directive.
    #[test]
    fn prompt_gets_no_think_suffix() {
        assert_eq!(
            CerebrasChat::with_suffix("Explain backpropagation."),
            "Explain backpropagation. /no_think"
        );
    }
}
