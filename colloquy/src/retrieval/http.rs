//! HTTP adapter for the vector-store query service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retrieval::{RetrievalError, Retriever};
use crate::state::RetrievalResult;

/// Deadline for one RAG query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct QueryRequest<'a> {
    course_id: &'a str,
    question: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_model: Option<&'a str>,
}

#[derive(Serialize)]
struct DebugRequest<'a> {
    course_id: &'a str,
    k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

#[derive(Deserialize)]
struct SourceEntry {
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

/// Retriever backed by the external vector-store query service.
pub struct HttpRetriever {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embedding_model: Option<String>,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(QUERY_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            embedding_model: None,
        }
    }

    /// Forwards an embedding-model hint with every query.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<QueryResponse, RetrievalError> {
        let mut request = self.http.post(format!("{}{path}", self.base_url)).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Unavailable(format!(
                "vector store returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))
    }

    fn into_results(response: QueryResponse) -> Vec<RetrievalResult> {
        response
            .sources
            .into_iter()
            .map(|s| {
                let source = RetrievalResult::canonical_source(&s.metadata);
                RetrievalResult {
                    content: s.content,
                    score: s.score,
                    source,
                    metadata: s.metadata,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let body = QueryRequest {
            course_id,
            question: query,
            k,
            embedding_model: self.embedding_model.as_deref(),
        };
        Ok(Self::into_results(self.post("/query", &body).await?))
    }

    async fn debug_list(
        &self,
        course_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let body = DebugRequest { course_id, k };
        Ok(Self::into_results(self.post("/debug/chunks", &body).await?))
    }
}
