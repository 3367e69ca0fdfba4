//! Deterministic LLM for tests: responses selected by prompt-content rules.
//!
//! The debate shares one client across agents and the critic's analyzers run
//! concurrently, so scripted-by-order mocks are racy. Rules match on a marker
//! substring of the prompt instead; the first matching rule wins.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::llm::ChatClient;
use crate::stream::MessageChunk;

/// Rule-based mock client. Records every prompt it sees.
#[derive(Debug)]
pub struct MockLlm {
    rules: Vec<(Vec<String>, String)>,
    fallback: String,
    calls: Mutex<Vec<String>>,
    /// When non-zero, `generate_stream` splits the response into chunks of at
    /// most this many characters instead of sending it whole.
    stream_chunk_chars: usize,
}

impl MockLlm {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
            stream_chunk_chars: 0,
        }
    }

    /// Adds a rule: prompts containing `marker` get `response`.
    pub fn with_rule(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((vec![marker.into()], response.into()));
        self
    }

    /// Adds a rule matching only prompts that contain **all** markers.
    pub fn with_rule_all(mut self, markers: &[&str], response: impl Into<String>) -> Self {
        self.rules
            .push((markers.iter().map(|m| m.to_string()).collect(), response.into()));
        self
    }

    pub fn with_stream_chunk_chars(mut self, chars: usize) -> Self {
        self.stream_chunk_chars = chars;
        self
    }

    /// Prompts seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }

    fn respond(&self, prompt: &str) -> String {
        self.calls
            .lock()
            .expect("mock lock")
            .push(prompt.to_string());
        self.rules
            .iter()
            .find(|(markers, _)| markers.iter().all(|m| prompt.contains(m.as_str())))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ChatClient for MockLlm {
    fn model(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        prompt: &str,
        _temperature: Option<f32>,
    ) -> Result<String, AgentError> {
        Ok(self.respond(prompt))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _temperature: Option<f32>,
        chunk_tx: mpsc::Sender<MessageChunk>,
    ) -> Result<String, AgentError> {
        let text = self.respond(prompt);
        if self.stream_chunk_chars == 0 {
            if !text.is_empty() {
                let _ = chunk_tx
                    .send(MessageChunk {
                        content: text.clone(),
                    })
                    .await;
            }
            return Ok(text);
        }

        let chars: Vec<char> = text.chars().collect();
        for window in chars.chunks(self.stream_chunk_chars) {
            let part: String = window.iter().collect();
            if chunk_tx.send(MessageChunk { content: part }).await.is_err() {
                break;
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The first matching rule wins; unmatched prompts fall back.
    #[tokio::test]
    async fn rules_match_by_marker() {
        let llm = MockLlm::new("default")
            .with_rule("CHAIN OF THOUGHT", "draft response")
            .with_rule("logic verifier", "{\"logic_issues\": []}");
        assert_eq!(
            llm.generate("produce a CHAIN OF THOUGHT", None).await.unwrap(),
            "draft response"
        );
        assert_eq!(
            llm.generate("You are a logic verifier", None).await.unwrap(),
            "{\"logic_issues\": []}"
        );
        assert_eq!(llm.generate("anything else", None).await.unwrap(), "default");
        assert_eq!(llm.calls().len(), 3);
    }

    /// **Scenario**: A conjunctive rule fires only when every marker is
    /// present, and earlier rules shadow later ones.
    #[tokio::test]
    async fn conjunctive_rules_require_all_markers() {
        let llm = MockLlm::new("default")
            .with_rule_all(&["fact checker", "round one"], "issue found")
            .with_rule("fact checker", "no issues");
        assert_eq!(
            llm.generate("fact checker examining round one draft", None)
                .await
                .unwrap(),
            "issue found"
        );
        assert_eq!(
            llm.generate("fact checker examining round two draft", None)
                .await
                .unwrap(),
            "no issues"
        );
    }

    /// **Scenario**: Chunked streaming splits on character boundaries and the
    /// concatenation equals the returned text.
    #[tokio::test]
    async fn chunked_stream_concatenates() {
        let llm = MockLlm::new("héllo wörld").with_stream_chunk_chars(4);
        let (tx, mut rx) = mpsc::channel(16);
        let full = llm.generate_stream("p", None, tx).await.unwrap();

        let mut collected = String::new();
        let mut chunks = 0;
        while let Ok(chunk) = rx.try_recv() {
            collected.push_str(&chunk.content);
            chunks += 1;
        }
        assert_eq!(collected, full);
        assert!(chunks > 1);
    }
}
