//! Retrieve agent: wraps the speculative retrieval chain as a graph node.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::ChatClient;
use crate::retrieval::{Retriever, SpeculativeRetrievalChain, DEFAULT_K};
use crate::state::{log_agent_execution, WorkflowState, WorkflowStatus};

/// First node in the graph: fills the retrieval fields of the state.
///
/// Never fails the workflow — retrieval catastrophe degrades to an empty
/// result set with quality zero, recorded in `error_messages`.
pub struct RetrieveNode {
    retriever: Arc<dyn Retriever>,
    chain: SpeculativeRetrievalChain,
}

impl RetrieveNode {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn ChatClient>,
        quality_threshold: f64,
    ) -> Self {
        let chain =
            SpeculativeRetrievalChain::new(Arc::clone(&retriever), llm, quality_threshold);
        Self { retriever, chain }
    }
}

#[async_trait]
impl Node<WorkflowState> for RetrieveNode {
    fn id(&self) -> &str {
        "retrieve"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(WorkflowState, Next), AgentError> {
        let started = Instant::now();

        // Unfiltered top-k listing for diagnostics; failures are ignored.
        match self.retriever.debug_list(&state.course_id, DEFAULT_K).await {
            Ok(chunks) => debug!(course_id = %state.course_id, count = chunks.len(), "debug chunk listing"),
            Err(e) => debug!(course_id = %state.course_id, error = %e, "debug chunk listing failed"),
        }

        let emit = |value: serde_json::Value| {
            ctx.emit_custom(value);
        };
        let out = self.chain.run(&state.query, &state.course_id, &emit).await;

        if out.results.is_empty() {
            let suggestion = format!(
                "Try rephrasing '{}' to be more specific about the course material.",
                state.query
            );
            info!(%suggestion, "retrieval produced no results");
            ctx.emit_custom(json!({
                "stage": "retrieve",
                "agent": "retrieve",
                "message": "No sources retrieved",
                "details": {"type": "no_results", "suggestion": suggestion},
            }));
        }

        state.retrieval_results = out.results;
        state.retrieval_quality_score = out.quality_score;
        state.retrieval_strategy = out.strategy.clone();
        state.speculative_queries = out.speculative_queries;
        state.error_messages.extend(out.errors);
        state.workflow_status = WorkflowStatus::Retrieving;

        let input_summary = format!("Query: {}", state.query);
        let summary = format!(
            "Retrieved {} chunks, quality: {:.3}, strategy: {}",
            state.retrieval_results.len(),
            state.retrieval_quality_score,
            out.strategy
        );
        log_agent_execution(
            &mut state,
            "Retrieve",
            input_summary,
            summary,
            started.elapsed().as_secs_f64(),
            true,
        );

        Ok((state, Next::Continue))
    }
}
