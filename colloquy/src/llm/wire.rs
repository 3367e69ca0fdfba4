//! Shared provider plumbing: OpenAI-compatible chat-completions DTOs, SSE
//! streaming, and failure classification.
//!
//! OpenAI, Cerebras, and the per-course custom endpoint all speak this
//! dialect; Gemini and Anthropic have their own DTOs in their modules but
//! reuse [`classify_failure`].

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::stream::MessageChunk;

/// How a non-success provider response is handled.
pub(crate) enum ProviderFailure {
    /// Returned to the caller as visible text, never retried.
    RateLimited(String),
    /// Raised as [`AgentError::Transient`] for backoff-retry.
    Transient(String),
    /// Raised as [`AgentError::Fatal`].
    Fatal(String),
}

/// Classifies an HTTP failure by status and body keywords: 429/quota text is
/// a rate limit, 5xx/overloaded is transient, the rest fatal.
pub(crate) fn classify_failure(provider: &str, status: u16, body: &str) -> ProviderFailure {
    let lowered = body.to_lowercase();
    if status == 429 || lowered.contains("rate limit") || lowered.contains("quota") {
        return ProviderFailure::RateLimited(format!(
            "{provider} API quota/rate limit reached: {status} {body}"
        ));
    }
    if (500u16..600).contains(&status) || lowered.contains("overloaded") {
        return ProviderFailure::Transient(format!("{provider} server error: {status} {body}"));
    }
    ProviderFailure::Fatal(format!("{provider} error: {status} {body}"))
}

/// Resolves a classified failure into the inline-text / error split.
pub(crate) fn failure_to_result(failure: ProviderFailure) -> Result<String, AgentError> {
    match failure {
        ProviderFailure::RateLimited(msg) => Ok(msg),
        ProviderFailure::Transient(msg) => Err(AgentError::Transient(msg)),
        ProviderFailure::Fatal(msg) => Err(AgentError::Fatal(msg)),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug)]
pub(crate) struct ChatCompletionsEndpoint {
    http: reqwest::Client,
    url: String,
    api_key: String,
    pub(crate) model: String,
    temperature: f32,
    top_p: f32,
}

impl ChatCompletionsEndpoint {
    pub(crate) fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.6,
            top_p: 0.95,
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str, temperature: Option<f32>, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: temperature.unwrap_or(self.temperature),
            top_p: self.top_p,
            stream,
        }
    }

    pub(crate) async fn complete(
        &self,
        provider: &str,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, temperature, false))
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("{provider} request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return failure_to_result(classify_failure(provider, status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(format!("{provider} response decode: {e}")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    pub(crate) async fn complete_stream(
        &self,
        provider: &str,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, temperature, true))
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("{provider} request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            // A rate-limit message still flows through the chunk channel so
            // the consumer sees it where the answer would have been.
            return match failure_to_result(classify_failure(provider, status, &body)) {
                Ok(msg) => {
                    let _ = chunk_tx
                        .send(MessageChunk {
                            content: msg.clone(),
                        })
                        .await;
                    Ok(msg)
                }
                Err(e) => Err(e),
            };
        }

        let mut full = String::new();
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| AgentError::Transient(format!("{provider} stream: {e}")))?;
            if event.data.trim() == "[DONE]" {
                break;
            }
            let chunk: ChunkResponse = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(_) => continue, // keep-alive or unknown event shapes
            };
            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    if text.is_empty() {
                        continue;
                    }
                    full.push_str(&text);
                    if chunk_tx
                        .send(MessageChunk { content: text })
                        .await
                        .is_err()
                    {
                        // Consumer hung up; release the provider connection.
                        return Ok(full);
                    }
                }
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: 429 and quota text classify as rate-limited, 5xx and
    /// overloaded as transient, 400 as fatal.
    #[test]
    fn failure_classification() {
        assert!(matches!(
            classify_failure("OpenAI", 429, "slow down"),
            ProviderFailure::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure("Cerebras", 400, "quota exceeded"),
            ProviderFailure::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure("Anthropic", 503, "unavailable"),
            ProviderFailure::Transient(_)
        ));
        assert!(matches!(
            classify_failure("Anthropic", 200, "model overloaded"),
            ProviderFailure::Transient(_)
        ));
        assert!(matches!(
            classify_failure("Gemini", 400, "bad request"),
            ProviderFailure::Fatal(_)
        ));
    }

    /// **Scenario**: Rate limits become inline text; the others become errors.
    #[test]
    fn failure_to_result_split() {
        let text = failure_to_result(ProviderFailure::RateLimited("limited".into())).unwrap();
        assert!(text.contains("limited"));
        assert!(matches!(
            failure_to_result(ProviderFailure::Transient("t".into())),
            Err(AgentError::Transient(_))
        ));
        assert!(matches!(
            failure_to_result(ProviderFailure::Fatal("f".into())),
            Err(AgentError::Fatal(_))
        ));
    }

    /// **Scenario**: Streaming delta JSON decodes into content text.
    #[test]
    fn chunk_delta_decodes() {
        let chunk: ChunkResponse = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
    }
}
