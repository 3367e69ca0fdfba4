//! LLM client abstraction for the debate agents.
//!
//! [`ChatClient`] is the uniform surface: `generate` for single-shot prompts
//! and `generate_stream` for token streaming through an mpsc chunk channel.
//! Providers: Gemini, OpenAI chat, Anthropic messages, Cerebras chat, and an
//! OpenAI-compatible custom endpoint keyed per course. Dispatch is by
//! model-name prefix (see [`client_for_model`]).
//!
//! # Failure policy
//!
//! - Quota / rate-limit responses are returned **inline** as user-visible
//!   text (`Ok(".. quota/rate limit reached ..")`), never as an error.
//! - 5xx / overloaded responses raise [`AgentError::Transient`] so
//!   [`generate_with_retry`] can back off and re-attempt (3 tries, 1 s base).
//! - Everything else raises [`AgentError::Fatal`].

mod anthropic;
mod cerebras;
mod gemini;
mod mock;
mod openai;
mod retry;
mod wire;

pub use anthropic::AnthropicChat;
pub use cerebras::CerebrasChat;
pub use gemini::GeminiChat;
pub use mock::MockLlm;
pub use openai::OpenAiChat;
pub use retry::retry_with_backoff;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::stream::MessageChunk;
use env_config::EngineEnv;

/// Default deadline for one chat LLM call.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
/// Retry attempts for transient provider failures.
pub const RETRY_ATTEMPTS: u32 = 3;
/// Base delay for exponential backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Model used when a `custom-` course key routes to the compatible endpoint.
const CUSTOM_ENDPOINT_MODEL: &str = "gpt-4o-mini";
/// Model used when dispatch falls back to the default provider.
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Chat LLM client: prompt in, text out, with an async streaming variant.
///
/// Streaming contract: implementations send chunks in arrival order through
/// `chunk_tx` and still return the complete response text at the end; the
/// concatenation of all chunks equals the returned string. Cancellation is
/// cooperative — when the receiver is dropped, sends fail and implementations
/// stop pulling from the provider.
#[async_trait]
pub trait ChatClient: Send + Sync + std::fmt::Debug {
    /// Model identifier this client speaks to.
    fn model(&self) -> &str;

    /// Single-shot completion.
    async fn generate(&self, prompt: &str, temperature: Option<f32>)
        -> Result<String, AgentError>;

    /// Streaming completion. Default implementation calls `generate` and
    /// sends the full content as one chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        let text = self.generate(prompt, temperature).await?;
        if !text.is_empty() {
            let _ = chunk_tx
                .send(MessageChunk {
                    content: text.clone(),
                })
                .await;
        }
        Ok(text)
    }
}

/// One guarded chat call: timeout plus backoff-retry on transient failures.
pub async fn generate_with_retry(
    client: &dyn ChatClient,
    prompt: &str,
    temperature: Option<f32>,
) -> Result<String, AgentError> {
    generate_with_retry_timeout(client, prompt, temperature, DEFAULT_LLM_TIMEOUT).await
}

/// [`generate_with_retry`] with an explicit per-call deadline.
pub async fn generate_with_retry_timeout(
    client: &dyn ChatClient,
    prompt: &str,
    temperature: Option<f32>,
    deadline: Duration,
) -> Result<String, AgentError> {
    retry_with_backoff(RETRY_ATTEMPTS, RETRY_BASE_DELAY, || async {
        match tokio::time::timeout(deadline, client.generate(prompt, temperature)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(deadline)),
        }
    })
    .await
}

/// Builds a client for the given model name.
///
/// Prefix dispatch: `gemini*` → Gemini, `gpt*` → OpenAI, `claude*` →
/// Anthropic, `qwen*`/`cerebras*` → Cerebras. `custom-*` routes to an
/// OpenAI-compatible endpoint with the course's stored key. Anything else
/// falls back to Gemini with its default model.
pub fn client_for_model(
    model: &str,
    env: &EngineEnv,
    course_api_key: Option<&str>,
) -> Result<Arc<dyn ChatClient>, AgentError> {
    fn require(key: &Option<String>, name: &str) -> Result<String, AgentError> {
        key.clone()
            .ok_or_else(|| AgentError::Fatal(format!("{name} not configured")))
    }

    if model.starts_with("custom-") {
        let key = course_api_key
            .ok_or_else(|| AgentError::Fatal("custom model requires a course API key".into()))?;
        return Ok(Arc::new(OpenAiChat::new(key, CUSTOM_ENDPOINT_MODEL)));
    }
    if model.starts_with("gemini") {
        return Ok(Arc::new(GeminiChat::new(
            require(&env.gemini_api_key, "GEMINI_API_KEY")?,
            model,
        )));
    }
    if model.starts_with("gpt") {
        return Ok(Arc::new(OpenAiChat::new(
            require(&env.openai_api_key, "OPENAI_API_KEY")?,
            model,
        )));
    }
    if model.starts_with("claude") {
        return Ok(Arc::new(AnthropicChat::new(
            require(&env.anthropic_api_key, "ANTHROPIC_API_KEY")?,
            model,
        )));
    }
    if model.starts_with("qwen") || model.starts_with("cerebras") {
        return Ok(Arc::new(CerebrasChat::new(
            require(&env.cerebras_api_key, "CEREBRAS_API_KEY")?,
            model,
        )));
    }
    Ok(Arc::new(GeminiChat::new(
        require(&env.gemini_api_key, "GEMINI_API_KEY")?,
        DEFAULT_GEMINI_MODEL,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_all_keys() -> EngineEnv {
        let mut env = EngineEnv::default();
        env.gemini_api_key = Some("g".into());
        env.openai_api_key = Some("o".into());
        env.anthropic_api_key = Some("a".into());
        env.cerebras_api_key = Some("c".into());
        env
    }

    /// **Scenario**: Each prefix routes to its provider family.
    #[test]
    fn dispatch_by_prefix() {
        let env = env_with_all_keys();
        for (model, expected) in [
            ("gemini-1.5-pro", "gemini-1.5-pro"),
            ("gpt-4o", "gpt-4o"),
            ("claude-3-sonnet-20240229", "claude-3-sonnet-20240229"),
            ("qwen-3-235b-a22b-instruct-2507", "qwen-3-235b-a22b-instruct-2507"),
            ("cerebras-llama", "cerebras-llama"),
        ] {
            let client = client_for_model(model, &env, None).unwrap();
            assert_eq!(client.model(), expected);
        }
    }

    /// **Scenario**: An unknown prefix falls back to the default Gemini model.
    #[test]
    fn unknown_prefix_falls_back_to_gemini() {
        let env = env_with_all_keys();
        let client = client_for_model("mystery-model", &env, None).unwrap();
        assert_eq!(client.model(), DEFAULT_GEMINI_MODEL);
    }

    /// **Scenario**: `custom-` requires a course key and uses the compatible
    /// endpoint's default model.
    #[test]
    fn custom_prefix_uses_course_key() {
        let env = EngineEnv::default();
        assert!(client_for_model("custom-econ101", &env, None).is_err());
        let client = client_for_model("custom-econ101", &env, Some("course-key")).unwrap();
        assert_eq!(client.model(), CUSTOM_ENDPOINT_MODEL);
    }

    /// **Scenario**: A missing provider key is a configuration error.
    #[test]
    fn missing_key_is_fatal() {
        let env = EngineEnv::default();
        let err = client_for_model("gpt-4o", &env, None).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    /// **Scenario**: The default streaming impl sends the whole response as
    /// one chunk and skips empty content.
    #[tokio::test]
    async fn default_stream_sends_single_chunk() {
        let llm = MockLlm::new("hello");
        let (tx, mut rx) = mpsc::channel(2);
        let text = llm.generate_stream("p", None, tx).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(rx.recv().await.unwrap().content, "hello");

        let llm = MockLlm::new("");
        let (tx, mut rx) = mpsc::channel(2);
        llm.generate_stream("p", None, tx).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
