//! Workflow graph assembly: the six agents wired into the debate loop, plus
//! routing and final-response formatting.
//!
//! `retrieve → strategist → critic → moderator → {strategist | reporter} →
//! tutor → END`, with the moderator's conditional edge closing the loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::agents::{
    CriticNode, ModeratorNode, ReporterNode, RetrieveNode, StrategistNode, TutorNode,
};
use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::llm::ChatClient;
use crate::memory::MemorySaver;
use crate::retrieval::Retriever;
use crate::state::{workflow_state_updater, ModeratorDecision, WorkflowState};
use env_config::EngineEnv;

/// Routing from the moderator: iterate re-enters the strategist, terminal
/// decisions go to the reporter, anything else ends the run.
pub fn route_from_moderator(state: &WorkflowState) -> String {
    let decision = state.moderator_decision;
    info!(
        decision = decision.as_str(),
        round = state.current_round,
        max_rounds = state.max_rounds,
        convergence_score = state.convergence_score,
        "workflow routing decision"
    );
    match decision {
        ModeratorDecision::Iterate => "strategist".to_string(),
        d if d.is_terminal() => "reporter".to_string(),
        d => {
            error!(decision = d.as_str(), "unexpected moderator decision, ending run");
            "end".to_string()
        }
    }
}

/// Builds and compiles the workflow graph.
///
/// `heavy_llm`, when set, serves the strategist and critic only; the other
/// agents (and the retrieve chain's reframer) stay on `base_llm`.
pub fn build_workflow(
    retriever: Arc<dyn Retriever>,
    base_llm: Arc<dyn ChatClient>,
    heavy_llm: Option<Arc<dyn ChatClient>>,
    env: &EngineEnv,
    checkpointer: Arc<MemorySaver<WorkflowState>>,
) -> Result<CompiledStateGraph<WorkflowState>, CompilationError> {
    let debate_llm = heavy_llm.unwrap_or_else(|| Arc::clone(&base_llm));

    let mut graph =
        StateGraph::new().with_state_updater(Arc::new(workflow_state_updater()));
    graph.add_node(
        "retrieve",
        Arc::new(RetrieveNode::new(
            Arc::clone(&retriever),
            Arc::clone(&base_llm),
            env.retrieval_quality_threshold,
        )),
    );
    graph.add_node(
        "strategist",
        Arc::new(StrategistNode::new(Arc::clone(&debate_llm))),
    );
    graph.add_node("critic", Arc::new(CriticNode::new(debate_llm)));
    graph.add_node(
        "moderator",
        Arc::new(ModeratorNode::new(
            Arc::clone(&base_llm),
            env.convergence_threshold,
            env.critical_severity_threshold,
        )),
    );
    graph.add_node("reporter", Arc::new(ReporterNode::new(Arc::clone(&base_llm))));
    graph.add_node("tutor", Arc::new(TutorNode::new(base_llm)));

    graph.add_edge(START, "retrieve");
    graph.add_edge("retrieve", "strategist");
    graph.add_edge("strategist", "critic");
    graph.add_edge("critic", "moderator");
    let path_map: HashMap<String, String> = [
        ("strategist".to_string(), "strategist".to_string()),
        ("reporter".to_string(), "reporter".to_string()),
        ("end".to_string(), END.to_string()),
    ]
    .into_iter()
    .collect();
    graph.add_conditional_edges("moderator", Arc::new(route_from_moderator), Some(path_map));
    graph.add_edge("reporter", "tutor");
    graph.add_edge("tutor", END);

    graph.compile_with_checkpointer(checkpointer)
}

/// Assembles the terminal `response` payload from the final state.
pub fn format_final_response(state: &WorkflowState, include_debug: bool) -> Value {
    let mut response = json!({
        "success": true,
        "answer": Value::Object(state.final_answer.clone()),
        "tutor_interaction": Value::Object(state.tutor_interaction.clone()),
        "metadata": {
            "debate_rounds": state.current_round,
            "convergence_score": state.convergence_score,
            "retrieval_quality_score": state.retrieval_quality_score,
            "retrieval_strategy": state.retrieval_strategy,
            "moderator_decision": state.moderator_decision.as_str(),
            "processing_times": state.processing_times,
            "total_processing_time": state.total_processing_time(),
        },
    });
    if include_debug {
        response["debug_info"] = json!({
            "conversation_history": state.conversation_history,
            "error_messages": state.error_messages,
            "speculative_queries": state.speculative_queries,
        });
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::retrieval::StaticRetriever;
    use crate::state::log_agent_execution;

    /// **Scenario**: Routing sends iterate back to the strategist, terminal
    /// decisions to the reporter, and pending to end.
    #[test]
    fn routing_covers_decision_alphabet() {
        let mut state = WorkflowState::new("q", "c", "s", 3);
        state.moderator_decision = ModeratorDecision::Iterate;
        assert_eq!(route_from_moderator(&state), "strategist");
        for d in [
            ModeratorDecision::Converged,
            ModeratorDecision::AbortDeadlock,
            ModeratorDecision::EscalateWithWarning,
        ] {
            state.moderator_decision = d;
            assert_eq!(route_from_moderator(&state), "reporter");
        }
        state.moderator_decision = ModeratorDecision::Pending;
        assert_eq!(route_from_moderator(&state), "end");
    }

    /// **Scenario**: The six-node graph compiles with its conditional loop.
    #[test]
    fn workflow_graph_compiles() {
        let graph = build_workflow(
            Arc::new(StaticRetriever::new("c")),
            Arc::new(MockLlm::new("x")),
            None,
            &EngineEnv::default(),
            Arc::new(MemorySaver::new()),
        );
        assert!(graph.is_ok());
    }

    /// **Scenario**: The response payload carries the metadata fields and the
    /// total equals the sum of per-agent times; debug info is gated.
    #[test]
    fn response_payload_shape() {
        let mut state = WorkflowState::new("q", "c", "s", 3);
        state.retrieval_strategy = "initial_sufficient".into();
        state.retrieval_quality_score = 0.82;
        state.moderator_decision = ModeratorDecision::Converged;
        state.convergence_score = 0.15;
        log_agent_execution(&mut state, "Retrieve", "i", "o", 1.0, true);
        log_agent_execution(&mut state, "Strategist", "i", "o", 2.5, true);
        state.speculative_queries = vec!["alt".into()];

        let response = format_final_response(&state, false);
        assert_eq!(response["success"], true);
        assert_eq!(response["metadata"]["debate_rounds"], 1);
        assert_eq!(response["metadata"]["moderator_decision"], "converged");
        assert_eq!(response["metadata"]["retrieval_strategy"], "initial_sufficient");
        assert!(
            (response["metadata"]["total_processing_time"].as_f64().unwrap() - 3.5).abs() < 1e-9
        );
        assert!(response.get("debug_info").is_none());

        let response = format_final_response(&state, true);
        assert_eq!(
            response["debug_info"]["speculative_queries"],
            json!(["alt"])
        );
        assert_eq!(
            response["debug_info"]["conversation_history"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }
}
