//! Speculative retrieval chain: initial retrieve → quality score →
//! conditional reframe → parallel alternative retrieval → merge/rerank.
//!
//! Quality assessment is deterministic (mean of similarity scores with a
//! small-result penalty); only the reframing step consults the LLM, and only
//! when quality falls below the threshold. Individual alternative-retrieval
//! failures are recorded and tolerated; the chain itself never fails.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::llm::{generate_with_retry, ChatClient};
use crate::retrieval::{Retriever, DEFAULT_K};
use crate::state::RetrievalResult;

/// Deadline for each alternative retrieval.
const ALT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);
/// At most this many reformulated queries are searched.
const MAX_ALTERNATIVES: usize = 3;
/// Merged results are capped here before the final quality score.
const MERGED_LIMIT: usize = 10;

const REFRAME_PROMPT: &str = r#"You are an expert at reformulating educational queries for better retrieval from course materials.
When initial retrieval quality is poor, generate alternative queries that might yield better results.
Keep the queries closely related to the original intent and topic.

Original Query: {query}

Initial Results Quality Score: {quality_score}
Quality Issues: {quality_issues}

The original query didn't match well with the course materials. Generate 3 alternative query formulations that:
1. Use different terminology or perspectives while staying on the same topic
2. Are more specific or break down the concept
3. Focus on different aspects of the SAME topic as the original query

IMPORTANT:
- Keep all alternative queries closely related to the original query's topic
- Generate CONCRETE queries without placeholders or brackets
- If the query mentions "yesterday" or "recent", rephrase to be about "recent topics" or "latest materials"

Format each query on a new line starting with "QUERY:".

Example for "What was covered in yesterday's lesson?":
QUERY: recent topics covered in class
QUERY: latest lecture materials and concepts
QUERY: most recent course content and examples"#;

/// Final output of the chain.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Merged results, sorted by descending score, capped at ten.
    pub results: Vec<RetrievalResult>,
    pub quality_score: f64,
    /// `initial_sufficient`, `refined_with_<N>_alternatives`, or `no_results`.
    pub strategy: String,
    pub speculative_queries: Vec<String>,
    /// Quality issues from the deterministic assessment.
    pub issues: Vec<String>,
    /// Non-fatal failures recorded along the way.
    pub errors: Vec<String>,
}

/// The four-stage retrieval pipeline. Owns no per-request state; `run` is
/// safe to call concurrently for different sessions.
pub struct SpeculativeRetrievalChain {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn ChatClient>,
    quality_threshold: f64,
}

impl SpeculativeRetrievalChain {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn ChatClient>,
        quality_threshold: f64,
    ) -> Self {
        Self {
            retriever,
            llm,
            quality_threshold,
        }
    }

    /// Runs the chain. `emit` receives progress payloads at stage 1 start,
    /// per alternative retrieval, and at merge completion.
    pub async fn run(
        &self,
        query: &str,
        course_id: &str,
        emit: &(dyn Fn(Value) + Send + Sync),
    ) -> ChainOutput {
        let mut errors = Vec::new();

        emit(progress_payload(
            "Performing contextual retrieval...",
            None,
        ));

        let initial = match self.retriever.search(course_id, query, DEFAULT_K).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "initial retrieval failed");
                errors.push(format!("Initial retrieval failed: {e}"));
                Vec::new()
            }
        };

        let (quality, issues) = assess_quality(&initial);
        info!(
            quality = quality,
            threshold = self.quality_threshold,
            count = initial.len(),
            "retrieval quality assessed"
        );

        // Exact equality passes; only strictly-below triggers expansion.
        if !(quality < self.quality_threshold) {
            return ChainOutput {
                results: initial,
                quality_score: quality,
                strategy: "initial_sufficient".to_string(),
                speculative_queries: Vec::new(),
                issues,
                errors,
            };
        }

        let alternatives = self
            .reframe(query, quality, &issues, &mut errors)
            .await;

        if alternatives.is_empty() && initial.is_empty() {
            return ChainOutput {
                results: Vec::new(),
                quality_score: 0.0,
                strategy: "no_results".to_string(),
                speculative_queries: Vec::new(),
                issues,
                errors,
            };
        }

        let alt_results = self
            .alternative_retrievals(course_id, &alternatives, emit, &mut errors)
            .await;

        let (merged, final_quality) = merge_and_rerank(initial, alt_results);
        emit(progress_payload(
            &format!(
                "Merged results: {} chunks, quality {:.3}",
                merged.len(),
                final_quality
            ),
            Some(json!({"type": "merge_complete", "count": merged.len()})),
        ));

        if merged.is_empty() {
            return ChainOutput {
                results: Vec::new(),
                quality_score: 0.0,
                strategy: "no_results".to_string(),
                speculative_queries: alternatives,
                issues,
                errors,
            };
        }

        ChainOutput {
            strategy: format!("refined_with_{}_alternatives", alternatives.len()),
            results: merged,
            quality_score: final_quality,
            speculative_queries: alternatives,
            issues,
            errors,
        }
    }

    /// Stage 3: one LLM call producing up to three alternative queries.
    async fn reframe(
        &self,
        query: &str,
        quality: f64,
        issues: &[String],
        errors: &mut Vec<String>,
    ) -> Vec<String> {
        let prompt = REFRAME_PROMPT
            .replace("{query}", query)
            .replace("{quality_score}", &format!("{quality:.3}"))
            .replace("{quality_issues}", &issues.join("; "));

        match generate_with_retry(self.llm.as_ref(), &prompt, Some(0.7)).await {
            Ok(response) => {
                let queries = parse_alternative_queries(&response);
                if queries.is_empty() {
                    warn!("no alternative queries extracted from reframing output");
                }
                queries
            }
            Err(e) => {
                warn!(error = %e, "query reframing failed");
                errors.push(format!("Query reframing failed: {e}"));
                Vec::new()
            }
        }
    }

    /// Stage 3b: searches each alternative concurrently, one outstanding call
    /// per alternative, each under its own 30 s deadline.
    async fn alternative_retrievals(
        &self,
        course_id: &str,
        alternatives: &[String],
        emit: &(dyn Fn(Value) + Send + Sync),
        errors: &mut Vec<String>,
    ) -> Vec<Vec<RetrievalResult>> {
        let searches = alternatives.iter().map(|alt| {
            emit(progress_payload(
                &format!("Searching with reformulated query: {alt}"),
                Some(json!({"type": "alternative_retrieval", "query": alt})),
            ));
            let retriever = Arc::clone(&self.retriever);
            let course_id = course_id.to_string();
            let alt = alt.clone();
            async move {
                let outcome = tokio::time::timeout(
                    ALT_RETRIEVAL_TIMEOUT,
                    retriever.search(&course_id, &alt, DEFAULT_K),
                )
                .await;
                (alt, outcome)
            }
        });

        let mut collected = Vec::new();
        for (alt, outcome) in futures::future::join_all(searches).await {
            match outcome {
                Ok(Ok(results)) => collected.push(results),
                Ok(Err(e)) => {
                    warn!(query = %alt, error = %e, "alternative retrieval failed");
                    errors.push(format!("Alternative retrieval failed for '{alt}': {e}"));
                }
                Err(_) => {
                    warn!(query = %alt, "alternative retrieval timed out");
                    errors.push(format!(
                        "Alternative retrieval timed out for '{alt}' after {}s",
                        ALT_RETRIEVAL_TIMEOUT.as_secs()
                    ));
                }
            }
        }
        collected
    }
}

fn progress_payload(message: &str, details: Option<Value>) -> Value {
    let mut payload = json!({
        "stage": "retrieve",
        "agent": "retrieve",
        "message": message,
    });
    if let Some(details) = details {
        payload["details"] = details;
    }
    payload
}

/// Stage 2: deterministic quality score and issue list.
pub(crate) fn assess_quality(results: &[RetrievalResult]) -> (f64, Vec<String>) {
    if results.is_empty() {
        return (0.0, vec!["No sources retrieved".to_string()]);
    }
    let mut score = results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64;
    let mut issues = Vec::new();
    if results.len() < 3 {
        issues.push(format!("Too few results ({})", results.len()));
        score *= 0.8;
    }
    if score < 0.3 {
        issues.push("Very low similarity scores".to_string());
    } else if score < 0.5 {
        issues.push("Low similarity scores".to_string());
    }
    (score, issues)
}

/// Extracts up to three alternative queries from the reframer's output.
///
/// Keeps `QUERY:`-prefixed lines that do not look like template placeholders;
/// falls back to non-empty lines longer than ten characters that are not
/// numbered bullets.
pub(crate) fn parse_alternative_queries(raw: &str) -> Vec<String> {
    let mut queries: Vec<String> = raw
        .lines()
        .filter_map(|line| line.trim().strip_prefix("QUERY:"))
        .map(str::trim)
        .filter(|q| !q.is_empty() && !(q.starts_with('{') && q.ends_with('}')))
        .map(str::to_string)
        .collect();

    if queries.is_empty() {
        queries = raw
            .lines()
            .map(str::trim)
            .filter(|l| {
                l.len() > 10
                    && !l.starts_with('#')
                    && !l.starts_with("1.")
                    && !l.starts_with("2.")
                    && !l.starts_with("3.")
            })
            .map(str::to_string)
            .collect();
    }

    queries.truncate(MAX_ALTERNATIVES);
    queries
}

/// Stage 3c: dedup by exact content (first seen wins), sort by descending
/// score with stable ties, keep the top ten, and recompute quality.
pub(crate) fn merge_and_rerank(
    initial: Vec<RetrievalResult>,
    alternatives: Vec<Vec<RetrievalResult>>,
) -> (Vec<RetrievalResult>, f64) {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut all = Vec::new();
    for result in initial.into_iter().chain(alternatives.into_iter().flatten()) {
        if seen.insert(result.content.clone()) {
            all.push(result);
        }
    }

    // Vec::sort_by is stable, so equal scores keep insertion order.
    all.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    all.truncate(MERGED_LIMIT);

    let quality = if all.is_empty() {
        0.0
    } else {
        all.iter().map(|r| r.score).sum::<f64>() / all.len() as f64
    };
    (all, quality)
}
