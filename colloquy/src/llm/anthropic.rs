//! Anthropic messages API.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::llm::wire::{classify_failure, failure_to_result};
use crate::llm::ChatClient;
use crate::stream::MessageChunk;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamEventData {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Client for Anthropic Claude models.
#[derive(Debug)]
pub struct AnthropicChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: f32,
}

impl AnthropicChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.6,
            top_p: 0.95,
        }
    }

    fn body<'a>(&'a self, prompt: &'a str, temperature: Option<f32>, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: temperature.unwrap_or(self.temperature),
            top_p: self.top_p,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream,
        }
    }

    fn request(&self, stream: bool, prompt: &str, temperature: Option<f32>) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{ANTHROPIC_BASE_URL}/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(prompt, temperature, stream))
    }
}

#[async_trait]
impl ChatClient for AnthropicChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        let response = self
            .request(false, prompt, temperature)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("Anthropic request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return failure_to_result(classify_failure("Anthropic", status, &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(format!("Anthropic response decode: {e}")))?;
        Ok(parsed
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        let response = self
            .request(true, prompt, temperature)
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("Anthropic request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return match failure_to_result(classify_failure("Anthropic", status, &body)) {
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
                event.map_err(|e| AgentError::Transient(format!("Anthropic stream: {e}")))?;
            let parsed: StreamEventData = match serde_json::from_str(&event.data) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if parsed.kind == "message_stop" {
                break;
            }
            let Some(text) = parsed.delta.and_then(|d| d.text) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            full.push_str(&text);
            if chunk_tx.send(MessageChunk { content: text }).await.is_err() {
                return Ok(full);
            }
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Content blocks concatenate into the response text.
    #[test]
    fn content_blocks_concatenate() {
        let parsed: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"A"},{"text":"B"}]}"#)
                .unwrap();
        let text: String = parsed.content.into_iter().filter_map(|b| b.text).collect();
        assert_eq!(text, "AB");
    }

    /// **Scenario**: Stream deltas expose their text; other events decode to none.
    #[test]
    fn stream_event_decodes_delta() {
        let ev: StreamEventData = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(ev.delta.and_then(|d| d.text).as_deref(), Some("hi"));

        let ev: StreamEventData = serde_json::from_str(r#"{"type":"message_start"}"#).unwrap();
        assert!(ev.delta.is_none());
    }
}
