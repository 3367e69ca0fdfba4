//! Google Gemini chat models via the `generateContent` API.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::llm::wire::{classify_failure, failure_to_result};
use crate::llm::ChatClient;
use crate::stream::MessageChunk;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn candidates_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect()
}

/// Client for Gemini models.
#[derive(Debug)]
pub struct GeminiChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.6,
        }
    }

    fn body<'a>(&self, prompt: &'a str, temperature: Option<f32>) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: temperature.unwrap_or(self.temperature),
            },
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChat {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&self.body(prompt, temperature))
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("Gemini request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return failure_to_result(classify_failure("Gemini", status, &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(format!("Gemini response decode: {e}")))?;
        Ok(candidates_text(parsed))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&self.body(prompt, temperature))
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("Gemini request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return match failure_to_result(classify_failure("Gemini", status, &body)) {
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
            let event = event.map_err(|e| AgentError::Transient(format!("Gemini stream: {e}")))?;
            let parsed: GenerateResponse = match serde_json::from_str(&event.data) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let text = candidates_text(parsed);
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

    /// **Scenario**: Candidate parts concatenate into the response text.
    #[test]
    fn candidates_text_joins_parts() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Back"},{"text":"prop"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(candidates_text(parsed), "Backprop");
    }

    /// **Scenario**: Empty candidate lists decode to empty text.
    #[test]
    fn empty_candidates_are_empty_text() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(candidates_text(parsed), "");
    }
}
