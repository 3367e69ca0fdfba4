//! Course-scoped similarity search over the external vector store.
//!
//! The adapter preserves the store's similarity scores end-to-end — nothing
//! here collapses or renormalizes them across queries — and always attaches
//! the `course_id` filter so results never leak across courses.

mod chain;
mod http;

pub use chain::{ChainOutput, SpeculativeRetrievalChain};
pub use http::HttpRetriever;

use async_trait::async_trait;
use thiserror::Error;

use crate::state::RetrievalResult;

/// Default number of chunks per search.
pub const DEFAULT_K: usize = 5;

/// Errors from the retrieval adapter.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The underlying store could not be reached. The speculative chain
    /// treats this as an empty-result, quality-zero outcome.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
    #[error("retrieval decode: {0}")]
    Decode(String),
}

/// Similarity search over a course-scoped corpus.
///
/// Scores are in [0,1], higher is better, and must be the store's actual
/// similarity values.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Top-`k` chunks for `query`, filtered to `course_id`.
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;

    /// Unfiltered top-`k` for diagnostics.
    async fn debug_list(
        &self,
        course_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;
}

/// Fixed-corpus retriever for tests: results selected by query marker.
pub struct StaticRetriever {
    course_id: String,
    rules: Vec<(String, Vec<RetrievalResult>)>,
    default: Vec<RetrievalResult>,
    unavailable: bool,
}

impl StaticRetriever {
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            rules: Vec::new(),
            default: Vec::new(),
            unavailable: false,
        }
    }

    /// Results returned when the query contains `marker`.
    pub fn with_rule(
        mut self,
        marker: impl Into<String>,
        results: Vec<RetrievalResult>,
    ) -> Self {
        self.rules.push((marker.into(), results));
        self
    }

    /// Results returned when no rule matches.
    pub fn with_default(mut self, results: Vec<RetrievalResult>) -> Self {
        self.default = results;
        self
    }

    /// Makes every call fail with [`RetrievalError::Unavailable`].
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

/// Builds a result with the given content and score.
pub fn result(content: &str, score: f64, source: &str) -> RetrievalResult {
    RetrievalResult {
        content: content.to_string(),
        score,
        source: source.to_string(),
        metadata: serde_json::Map::new(),
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(
        &self,
        course_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("store offline".into()));
        }
        if course_id != self.course_id {
            return Ok(Vec::new());
        }
        let mut results = self
            .rules
            .iter()
            .find(|(marker, _)| query.contains(marker.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.default.clone());
        results.truncate(k);
        Ok(results)
    }

    async fn debug_list(
        &self,
        _course_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("store offline".into()));
        }
        let mut results = self.default.clone();
        results.truncate(k);
        Ok(results)
    }
}
