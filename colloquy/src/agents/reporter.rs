//! Reporter agent: synthesizes the structured final answer.
//!
//! Branches on the moderator's terminal decision: approved synthesis,
//! transparent deadlock synthesis, or deadlock-plus-warning on escalation.
//! When the run is streaming, the synthesis text is forwarded chunk by chunk
//! through the run's event channel before being parsed into sections.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::agents::{section, split_markdown_sections};
use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::{generate_with_retry, ChatClient, DEFAULT_LLM_TIMEOUT};
use crate::state::{
    log_agent_execution, ModeratorDecision, RetrievalResult, Severity, WorkflowState,
    WorkflowStatus,
};
use crate::stream::ChunkToStreamSender;

/// Sources listed in the final answer are capped here.
const MAX_SOURCES: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are an expert educational content writer and report synthesizer. Your role is to:

1. SYNTHESIZE verified content into polished, final answers
2. STRUCTURE responses for maximum educational value
3. INTEGRATE remaining minor issues seamlessly
4. ATTRIBUTE sources clearly and transparently
5. MAINTAIN academic rigor while ensuring accessibility

Key principles:
- Write in the tone of a seasoned, knowledgeable teacher
- Organize content logically: introduction, steps, key takeaways
- Be transparent about knowledge boundaries and limitations
- Provide clear, actionable insights"#;

/// Produces `final_answer` and never fails the workflow: LLM failures degrade
/// to a minimal structured answer.
pub struct ReporterNode {
    llm: Arc<dyn ChatClient>,
}

impl ReporterNode {
    pub fn new(llm: Arc<dyn ChatClient>) -> Self {
        Self { llm }
    }

    fn approved_prompt(state: &WorkflowState) -> String {
        let draft = state
            .draft
            .as_ref()
            .map(|d| d.content.as_str())
            .unwrap_or("");
        let cot = state
            .draft
            .as_ref()
            .map(|d| {
                d.chain_of_thought
                    .iter()
                    .map(|s| {
                        let mut line = format!("Step {}: {}", s.step, s.thought);
                        if !s.details.is_empty() {
                            line.push_str(&format!(
                                "\n  - {}",
                                s.details
                                    .iter()
                                    .take(3)
                                    .cloned()
                                    .collect::<Vec<_>>()
                                    .join("; ")
                            ));
                        }
                        line
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No detailed reasoning process available.".to_string());

        format!(
            "{SYSTEM_PROMPT}\n\nORIGINAL QUERY:\n{query}\n\nVERIFIED DRAFT CONTENT:\n{draft}\n\n\
             REASONING PROCESS:\n{cot}\n\nMINOR REMAINING ISSUES TO ADDRESS:\n{issues}\n\n\
             SUPPORTING CONTEXT:\n{context}\n\n\
             Please synthesize this into a final, polished answer using this structure:\n\n\
             ## INTRODUCTION\n[Brief context-setting introduction that acknowledges the question and previews the approach]\n\n\
             ## STEP-BY-STEP SOLUTION\n[Clear, logical progression through the solution, incorporating insights from the reasoning process]\n\n\
             ## KEY TAKEAWAYS\n[Important concepts, principles, or insights that generalize beyond this specific question]\n\n\
             ## IMPORTANT NOTES\n[Any limitations, assumptions, or areas requiring caution - address minor issues transparently]\n\n\
             Requirements:\n\
             - Integrate minor issues seamlessly (don't ignore them, but address them naturally)\n\
             - Maintain educational value and clear explanations\n\
             - Use a confident but honest tone",
            query = state.query,
            issues = format_minor_issues(state),
            context = format_context_summary(&state.retrieval_results),
        )
    }

    fn deadlock_prompt(state: &WorkflowState) -> String {
        let draft = state
            .draft
            .as_ref()
            .map(|d| d.content.as_str())
            .unwrap_or("");
        format!(
            "{SYSTEM_PROMPT}\n\n\
             SITUATION: The debate process reached a deadlock without full convergence. You need to provide \
             the best possible answer while being transparent about limitations.\n\n\
             ORIGINAL QUERY:\n{query}\n\nBEST AVAILABLE DRAFT:\n{draft}\n\n\
             UNRESOLVED ISSUES:\n{issues}\n\nSUPPORTING CONTEXT:\n{context}\n\n\
             Please create a transparent, educational response using this structure:\n\n\
             ## PARTIAL SOLUTION\n[Present the best available information and reasoning, clearly indicating confidence levels]\n\n\
             ## AREAS OF UNCERTAINTY\n[Honestly discuss unresolved aspects, conflicting information, or gaps in knowledge]\n\n\
             ## WHAT WE CAN CONCLUDE\n[Clearly state what can be confidently concluded from available information]\n\n\
             ## RECOMMENDATIONS FOR FURTHER EXPLORATION\n[Suggest specific areas for additional research or verification]\n\n\
             Requirements:\n\
             - Be completely honest about limitations\n\
             - Still provide maximum educational value\n\
             - Guide the user toward reliable sources for unclear areas",
            query = state.query,
            issues = format_unresolved_issues(state),
            context = format_context_summary(&state.retrieval_results),
        )
    }

    async fn synthesize(
        &self,
        prompt: &str,
        temperature: f32,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<String, AgentError> {
        match &ctx.stream_tx {
            Some(tx) => {
                let sender = ChunkToStreamSender::new(tx.clone(), "reporter");
                let (chunk_tx, chunk_rx) = sender.channel();
                let generate = tokio::time::timeout(
                    DEFAULT_LLM_TIMEOUT,
                    self.llm
                        .generate_stream(prompt, Some(temperature), chunk_tx),
                );
                let (result, ()) = tokio::join!(generate, sender.forward(chunk_rx));
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(AgentError::Timeout(DEFAULT_LLM_TIMEOUT)),
                }
            }
            None => generate_with_retry(self.llm.as_ref(), prompt, Some(temperature)).await,
        }
    }
}

fn format_minor_issues(state: &WorkflowState) -> String {
    if state.critiques.is_empty() {
        return "No minor issues to address.".to_string();
    }
    state
        .critiques
        .iter()
        .take(5)
        .map(|c| format!("• ({}) {}", c.severity.as_str(), c.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_unresolved_issues(state: &WorkflowState) -> String {
    if state.critiques.is_empty() {
        return "No specific unresolved issues documented.".to_string();
    }
    let mut lines = Vec::new();
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        let group: Vec<&str> = state
            .critiques
            .iter()
            .filter(|c| c.severity == severity)
            .take(3)
            .map(|c| c.description.as_str())
            .collect();
        if !group.is_empty() {
            lines.push(format!("{} ISSUES:", severity.as_str().to_uppercase()));
            for description in group {
                lines.push(format!("• {description}"));
            }
        }
    }
    lines.join("\n")
}

fn format_context_summary(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No additional context sources available.".to_string();
    }
    results
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, r)| {
            let snippet: String = r.content.chars().take(300).collect();
            format!("Source {} (Relevance: {:.3}):\n{snippet}", i + 1, r.score)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Maps the synthesis text into the named answer fields. When no headings
/// parse, the raw response lands in the primary solution field.
fn parse_structured_answer(response: &str, deadlock_mode: bool) -> Map<String, Value> {
    let sections = split_markdown_sections(response);
    let get = |key: &str| section(&sections, key).unwrap_or("").to_string();
    let mut answer = Map::new();

    if deadlock_mode {
        let partial = section(&sections, "partial_solution")
            .filter(|s| !s.is_empty())
            .unwrap_or(response)
            .to_string();
        answer.insert("partial_solution".into(), Value::String(partial));
        answer.insert(
            "areas_of_uncertainty".into(),
            Value::String(get("areas_of_uncertainty")),
        );
        answer.insert(
            "what_we_can_conclude".into(),
            Value::String(get("what_we_can_conclude")),
        );
        answer.insert(
            "recommendations_for_further_exploration".into(),
            Value::String(get("recommendations_for_further_exploration")),
        );
    } else {
        let solution = section(&sections, "step_by_step_solution")
            .filter(|s| !s.is_empty())
            .unwrap_or(response)
            .to_string();
        answer.insert("introduction".into(), Value::String(get("introduction")));
        answer.insert("step_by_step_solution".into(), Value::String(solution));
        answer.insert("key_takeaways".into(), Value::String(get("key_takeaways")));
        answer.insert(
            "important_notes".into(),
            Value::String(get("important_notes")),
        );
    }
    answer
}

fn fallback_answer(state: &WorkflowState, deadlock_mode: bool) -> Map<String, Value> {
    let draft = state
        .draft
        .as_ref()
        .map(|d| d.content.clone())
        .unwrap_or_default();
    let mut answer = Map::new();
    if deadlock_mode {
        answer.insert(
            "partial_solution".into(),
            Value::String(if draft.is_empty() {
                "Unable to provide complete solution due to unresolved issues.".to_string()
            } else {
                draft
            }),
        );
        answer.insert(
            "areas_of_uncertainty".into(),
            Value::String(
                "Multiple technical issues prevented full verification of this response.".into(),
            ),
        );
        answer.insert(
            "recommendations_for_further_exploration".into(),
            Value::String("Please consult additional authoritative sources for verification.".into()),
        );
    } else {
        answer.insert(
            "introduction".into(),
            Value::String(format!("Addressing your question: {}", state.query)),
        );
        answer.insert(
            "step_by_step_solution".into(),
            Value::String(if draft.is_empty() {
                "Unable to generate complete solution.".to_string()
            } else {
                draft
            }),
        );
        answer.insert(
            "key_takeaways".into(),
            Value::String("This response was generated with limited verification.".into()),
        );
        answer.insert(
            "important_notes".into(),
            Value::String("Please verify this information with additional sources.".into()),
        );
    }
    answer
}

/// Attaches confidence, sources, and quality indicators to the answer.
fn enhance_with_metadata(
    mut answer: Map<String, Value>,
    state: &WorkflowState,
    debate_status: &str,
) -> Map<String, Value> {
    let confidence = state.convergence_score;
    answer.insert("confidence_score".into(), json!(confidence));

    // Retrieval results are already sorted by descending score.
    let sources: Vec<String> = state
        .retrieval_results
        .iter()
        .take(MAX_SOURCES)
        .map(|r| format!("{} (relevance: {:.3})", r.source, r.score))
        .collect();
    answer.insert("sources".into(), json!(sources));

    let verification_level = if debate_status == "escalated" {
        "limited"
    } else if confidence > 0.8 {
        "high"
    } else if confidence > 0.5 {
        "medium"
    } else {
        "limited"
    };
    let context_support = if state.retrieval_results.len() >= 3 {
        "strong"
    } else if !state.retrieval_results.is_empty() {
        "moderate"
    } else {
        "limited"
    };
    answer.insert(
        "quality_indicators".into(),
        json!({
            "debate_status": debate_status,
            "verification_level": verification_level,
            "context_support": context_support,
        }),
    );

    if debate_status == "escalated" {
        let counts = state.severity_counts();
        answer.insert(
            "warning".into(),
            Value::String(format!(
                "Critical issues remain: {} critical, {} high severity issues.",
                counts.critical, counts.high
            )),
        );
    }
    answer
}

#[async_trait]
impl Node<WorkflowState> for ReporterNode {
    fn id(&self) -> &str {
        "reporter"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(WorkflowState, Next), AgentError> {
        let started = Instant::now();
        let decision = state.moderator_decision;
        if !decision.is_terminal() {
            return Err(AgentError::node(
                "reporter",
                format!("entered with non-terminal decision: {}", decision.as_str()),
            ));
        }

        ctx.emit_custom(json!({
            "stage": "reporter",
            "agent": "reporter",
            "message": "Synthesizing final answer...",
        }));

        let (prompt, temperature, deadlock_mode, debate_status) = match decision {
            ModeratorDecision::Converged => {
                (Self::approved_prompt(&state), 0.3, false, "approved")
            }
            ModeratorDecision::AbortDeadlock => {
                (Self::deadlock_prompt(&state), 0.2, true, "deadlock")
            }
            _ => (Self::deadlock_prompt(&state), 0.2, true, "escalated"),
        };

        let answer = match self.synthesize(&prompt, temperature, ctx).await {
            Ok(response) if !response.trim().is_empty() => {
                parse_structured_answer(&response, deadlock_mode)
            }
            Ok(_) => {
                warn!("synthesis produced empty response, using fallback structure");
                fallback_answer(&state, deadlock_mode)
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed, using fallback structure");
                state
                    .error_messages
                    .push(format!("Reporter synthesis failed: {e}"));
                fallback_answer(&state, deadlock_mode)
            }
        };

        state.final_answer = enhance_with_metadata(answer, &state, debate_status);
        state.workflow_status = WorkflowStatus::Synthesizing;

        let answer_len: usize = state
            .final_answer
            .values()
            .filter_map(Value::as_str)
            .map(str::len)
            .sum();
        log_agent_execution(
            &mut state,
            "Reporter",
            format!("Decision: {}", decision.as_str()),
            format!("Synthesized {debate_status} answer, {answer_len} chars"),
            started.elapsed().as_secs_f64(),
            true,
        );

        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::retrieval::result;
    use crate::state::{Critique, CritiqueKind, Draft};

    fn terminal_state(decision: ModeratorDecision) -> WorkflowState {
        let mut state = WorkflowState::new("What is gradient descent?", "c", "sess", 3);
        state.moderator_decision = decision;
        state.convergence_score = 0.2;
        state.draft = Some(Draft {
            draft_id: "draft_sess".into(),
            content: "Gradient descent minimizes loss iteratively.".into(),
            chain_of_thought: vec![],
        });
        state.retrieval_results = vec![
            result("a", 0.9, "d1:chunk_0"),
            result("b", 0.8, "d1:chunk_1"),
            result("c", 0.7, "d2:chunk_0"),
        ];
        state
    }

    const APPROVED_RESPONSE: &str = "## INTRODUCTION\nA quick orientation.\n\n## STEP-BY-STEP SOLUTION\nFirst compute the gradient, then step against it.\n\n## KEY TAKEAWAYS\nLearning rate matters.\n\n## IMPORTANT NOTES\nConvexity assumed.";

    /// **Scenario**: An approved synthesis parses into the four sections with
    /// sources ordered by descending score.
    #[tokio::test]
    async fn approved_answer_has_sections_and_sources() {
        let node = ReporterNode::new(Arc::new(MockLlm::new(APPROVED_RESPONSE)));
        let (state, _) = node
            .run(terminal_state(ModeratorDecision::Converged), &RunContext::detached())
            .await
            .unwrap();

        let answer = &state.final_answer;
        assert_eq!(answer["introduction"], "A quick orientation.");
        assert!(answer["step_by_step_solution"]
            .as_str()
            .unwrap()
            .contains("compute the gradient"));
        let sources = answer["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 3);
        assert!(sources[0].as_str().unwrap().starts_with("d1:chunk_0"));
        assert_eq!(answer["quality_indicators"]["debate_status"], "approved");
        assert_eq!(
            answer["quality_indicators"]["context_support"],
            "strong"
        );
        assert_eq!(state.workflow_status, WorkflowStatus::Synthesizing);
    }

    /// **Scenario**: Deadlock produces the transparency-shaped answer.
    #[tokio::test]
    async fn deadlock_answer_shape() {
        let response = "## PARTIAL SOLUTION\nBest effort.\n\n## AREAS OF UNCERTAINTY\nThe premise is contested.\n\n## WHAT WE CAN CONCLUDE\nLittle.\n\n## RECOMMENDATIONS FOR FURTHER EXPLORATION\nCheck the textbook.";
        let node = ReporterNode::new(Arc::new(MockLlm::new(response)));
        let mut state = terminal_state(ModeratorDecision::AbortDeadlock);
        state.critiques = vec![Critique {
            kind: CritiqueKind::LogicFlaw,
            severity: Severity::High,
            description: "unsupported leap".into(),
            step_ref: None,
            claim: None,
        }];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        let answer = &state.final_answer;
        assert_eq!(answer["partial_solution"], "Best effort.");
        assert_eq!(answer["areas_of_uncertainty"], "The premise is contested.");
        assert_eq!(answer["quality_indicators"]["debate_status"], "deadlock");
        assert!(answer.get("warning").is_none());
    }

    /// **Scenario**: Escalation carries a warning and limited verification.
    #[tokio::test]
    async fn escalation_carries_warning() {
        let node = ReporterNode::new(Arc::new(MockLlm::new("## PARTIAL SOLUTION\nCareful.")));
        let mut state = terminal_state(ModeratorDecision::EscalateWithWarning);
        state.critiques = vec![
            Critique {
                kind: CritiqueKind::Hallucination,
                severity: Severity::Critical,
                description: "fabricated theorem".into(),
                step_ref: None,
                claim: None,
            },
            Critique {
                kind: CritiqueKind::FactContradiction,
                severity: Severity::Critical,
                description: "wrong constant".into(),
                step_ref: None,
                claim: Some("c = 2".into()),
            },
        ];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        let answer = &state.final_answer;
        assert!(answer["warning"].as_str().unwrap().contains("2 critical"));
        assert_eq!(
            answer["quality_indicators"]["verification_level"],
            "limited"
        );
    }

    /// **Scenario**: A sectionless response lands raw in the primary solution
    /// field.
    #[test]
    fn sectionless_response_falls_back_raw() {
        let raw = "Just a plain paragraph with no headings.";
        let answer = parse_structured_answer(raw, false);
        assert_eq!(answer["step_by_step_solution"], raw);
        assert_eq!(answer["introduction"], "");

        let answer = parse_structured_answer(raw, true);
        assert_eq!(answer["partial_solution"], raw);
    }

    /// **Scenario**: Reporter refuses to run on a non-terminal decision.
    #[tokio::test]
    async fn rejects_non_terminal_decision() {
        let node = ReporterNode::new(Arc::new(MockLlm::new("x")));
        for decision in [ModeratorDecision::Pending, ModeratorDecision::Iterate] {
            let err = node.run(terminal_state(decision), &RunContext::detached()).await.unwrap_err();
            assert!(err.to_string().contains("non-terminal"));
        }
    }

    /// **Scenario**: Zero retrieval results still produce a structured answer
    /// with limited context support.
    #[tokio::test]
    async fn no_context_still_structured() {
        let node = ReporterNode::new(Arc::new(MockLlm::new(APPROVED_RESPONSE)));
        let mut state = terminal_state(ModeratorDecision::Converged);
        state.retrieval_results.clear();
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert_eq!(
            state.final_answer["quality_indicators"]["context_support"],
            "limited"
        );
        assert!(state.final_answer["sources"].as_array().unwrap().is_empty());
    }
}
