//! Tutor agent: wraps the final answer with a learning interaction.
//!
//! Interaction type is chosen from the session's query history: first contact
//! gets a Socratic warm-up, detected copying patterns get a quiz or a
//! cooldown, everything else is a standard turn. All sub-chains are
//! best-effort; a failure drops the element rather than the interaction.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::{generate_with_retry, ChatClient};
use crate::state::{log_agent_execution, WorkflowState, WorkflowStatus};

/// Similarity above which repeated queries count as a copying pattern.
const SIMILARITY_THRESHOLD: f64 = 0.8;
/// Exact-repeat count that triggers testing without consulting the LLM.
const CONSECUTIVE_SIMILAR_THRESHOLD: usize = 3;
/// Tips appended to the interaction.
const MAX_TIPS: usize = 3;

const GUIDE_PROMPT: &str = r#"You are a Socratic tutor preparing students to learn.
Generate thought-provoking questions that activate prior knowledge.

Query: {query}

Answer Summary: {answer_summary}

Generate a brief guiding question to ask BEFORE showing the answer.
The question should:
- Activate relevant prior knowledge
- Be thought-provoking but not frustrating
- Take less than 30 seconds to consider

Format: QUESTION: [your question]"#;

const PATTERN_PROMPT: &str = r#"Analyze if the user is genuinely learning or just copying homework.

Current Query: {current_query}

Previous Queries:
{previous_queries}

Analyze:
1. SIMILARITY: Are these essentially the same question? (0-1 score)
2. PATTERN: Is this homework copying behavior? (yes/no)
3. RECOMMENDATION: What should we do? (continue/test/warn)

Format:
SIMILARITY: X.XX
PATTERN: yes/no
RECOMMENDATION: [action]"#;

const QUIZ_PROMPT: &str = r#"Generate educational quiz questions to test understanding.

Topic: {query}

Key Concepts from Answer:
{key_concepts}

Generate 2 multiple-choice questions that test understanding of core concepts.

For each question provide:
QUESTION_1: [question text]
OPTIONS_1: A) [option] B) [option] C) [option] D) [option]
CORRECT_1: [A/B/C/D]
EXPLANATION_1: [why this is correct]

QUESTION_2: [question text]
OPTIONS_2: A) [option] B) [option] C) [option] D) [option]
CORRECT_2: [A/B/C/D]
EXPLANATION_2: [why this is correct]"#;

const TIPS_PROMPT: &str = r#"Generate personalized learning tips based on the topic.

Query: {query}

Answer Provided: {answer_summary}

User Interaction Type: {interaction_type}

Generate 3 specific, actionable learning tips for mastering this topic.

Format each tip on a new line starting with "TIP:"."#;

const COOLDOWN_MESSAGE: &str = "It seems you might be struggling with this topic. \
I recommend taking a break to review the provided materials thoroughly. \
Understanding the concepts is more important than getting quick answers. \
Try working through some practice problems on your own first, \
then come back if you have specific questions about your approach.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractionType {
    Guide,
    Standard,
    Test,
    Discipline,
}

impl InteractionType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Guide => "guide",
            Self::Standard => "standard",
            Self::Test => "test",
            Self::Discipline => "discipline",
        }
    }
}

/// Final node: builds `tutor_interaction` around the synthesized answer.
pub struct TutorNode {
    llm: Arc<dyn ChatClient>,
}

impl TutorNode {
    pub fn new(llm: Arc<dyn ChatClient>) -> Self {
        Self { llm }
    }

    async fn determine_interaction_type(&self, state: &WorkflowState) -> InteractionType {
        let recent = recent_queries(state);
        if recent.is_empty() {
            return InteractionType::Guide;
        }

        // Deterministic shortcut: three or more exact repeats is a pattern.
        let repeats = recent.iter().filter(|q| **q == state.query).count();
        if repeats >= CONSECUTIVE_SIMILAR_THRESHOLD {
            return InteractionType::Test;
        }

        let prompt = PATTERN_PROMPT
            .replace("{current_query}", &state.query)
            .replace("{previous_queries}", &recent.join("\n"));
        let response = match generate_with_retry(self.llm.as_ref(), &prompt, Some(0.1)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "pattern analysis failed");
                return InteractionType::Standard;
            }
        };

        let mut similarity = 0.0_f64;
        let mut pattern = false;
        let mut recommendation = String::from("continue");
        for line in response.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("SIMILARITY:") {
                similarity = rest.trim().parse().unwrap_or(0.0);
            } else if let Some(rest) = line.strip_prefix("PATTERN:") {
                pattern = rest.trim().eq_ignore_ascii_case("yes");
            } else if let Some(rest) = line.strip_prefix("RECOMMENDATION:") {
                recommendation = rest.trim().to_lowercase();
            }
        }

        if pattern || similarity > SIMILARITY_THRESHOLD {
            match recommendation.as_str() {
                "test" => return InteractionType::Test,
                "warn" => return InteractionType::Discipline,
                _ => {}
            }
        }
        InteractionType::Standard
    }

    async fn guide_question(&self, state: &WorkflowState) -> Option<String> {
        let summary = state
            .final_answer
            .get("introduction")
            .and_then(Value::as_str)
            .unwrap_or("");
        let prompt = GUIDE_PROMPT
            .replace("{query}", &state.query)
            .replace("{answer_summary}", summary);
        let response = generate_with_retry(self.llm.as_ref(), &prompt, Some(0.5))
            .await
            .map_err(|e| warn!(error = %e, "guide question generation failed"))
            .ok()?;
        response
            .lines()
            .find_map(|l| l.trim().strip_prefix("QUESTION:"))
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
    }

    async fn quiz(&self, state: &WorkflowState) -> Option<Value> {
        let prompt = QUIZ_PROMPT
            .replace("{query}", &state.query)
            .replace("{key_concepts}", &key_concepts(&state.final_answer));
        let response = generate_with_retry(self.llm.as_ref(), &prompt, Some(0.4))
            .await
            .map_err(|e| warn!(error = %e, "quiz generation failed"))
            .ok()?;

        let mut questions = Vec::new();
        for n in 1..=2 {
            let field = |prefix: &str| {
                response
                    .lines()
                    .find_map(|l| l.trim().strip_prefix(&format!("{prefix}_{n}:")))
                    .map(|v| v.trim().to_string())
            };
            if let Some(question) = field("QUESTION") {
                questions.push(json!({
                    "question": question,
                    "options": field("OPTIONS").unwrap_or_default(),
                    "correct": field("CORRECT").unwrap_or_default(),
                    "explanation": field("EXPLANATION").unwrap_or_default(),
                }));
            }
        }
        (!questions.is_empty()).then(|| json!({ "questions": questions }))
    }

    async fn learning_tips(
        &self,
        state: &WorkflowState,
        interaction_type: InteractionType,
    ) -> Vec<String> {
        let summary = serde_json::to_string(&state.final_answer).unwrap_or_default();
        let prompt = TIPS_PROMPT
            .replace("{query}", &state.query)
            .replace("{answer_summary}", &summary)
            .replace("{interaction_type}", interaction_type.as_str());
        match generate_with_retry(self.llm.as_ref(), &prompt, Some(0.5)).await {
            Ok(response) => response
                .lines()
                .filter_map(|l| l.trim().strip_prefix("TIP:"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .take(MAX_TIPS)
                .collect(),
            Err(e) => {
                warn!(error = %e, "learning tips generation failed");
                Vec::new()
            }
        }
    }
}

/// Queries from earlier turns: caller-supplied history plus the ones recorded
/// by the retrieve agent in the audit log (excluding this turn's own entry).
fn recent_queries(state: &WorkflowState) -> Vec<String> {
    let mut queries = state.prior_queries.clone();
    for entry in &state.conversation_history {
        if entry.agent_name == "Retrieve" {
            if let Some(q) = entry.input_summary.strip_prefix("Query: ") {
                if q != state.query {
                    queries.push(q.to_string());
                }
            }
        }
    }
    queries
}

fn key_concepts(answer: &Map<String, Value>) -> String {
    let mut concepts = Vec::new();
    if let Some(takeaways) = answer.get("key_takeaways").and_then(Value::as_str) {
        concepts.push(takeaways.to_string());
    }
    if let Some(solution) = answer.get("step_by_step_solution").and_then(Value::as_str) {
        concepts.extend(solution.lines().map(str::to_string));
    }
    concepts.join("\n")
}

#[async_trait]
impl Node<WorkflowState> for TutorNode {
    fn id(&self) -> &str {
        "tutor"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(WorkflowState, Next), AgentError> {
        let started = Instant::now();
        let interaction_type = self.determine_interaction_type(&state).await;

        let mut elements: Vec<Value> = Vec::new();

        if matches!(
            interaction_type,
            InteractionType::Guide | InteractionType::Standard
        ) {
            if let Some(question) = self.guide_question(&state).await {
                elements.push(json!({"type": "text", "content": question}));
            }
        }

        elements.push(json!({"type": "answer", "content": Value::Object(state.final_answer.clone())}));

        if interaction_type == InteractionType::Test {
            if let Some(quiz) = self.quiz(&state).await {
                elements.push(json!({"type": "quiz", "content": quiz}));
            }
        }

        if interaction_type == InteractionType::Discipline {
            elements.push(json!({"type": "cooldown_message", "content": COOLDOWN_MESSAGE}));
        }

        for tip in self.learning_tips(&state, interaction_type).await {
            elements.push(json!({"type": "text", "content": format!("💡 {tip}")}));
        }

        let mut interaction = Map::new();
        interaction.insert(
            "interaction_type".into(),
            Value::String(interaction_type.as_str().to_string()),
        );
        interaction.insert("elements".into(), Value::Array(elements.clone()));

        ctx.emit_custom(json!({
            "stage": "tutor",
            "agent": "tutor",
            "message": format!("Educational content prepared ({} elements)", elements.len()),
            "details": {
                "type": "tutor_complete",
                "interaction_type": interaction_type.as_str(),
                "total_elements": elements.len(),
            },
        }));

        state.tutor_interaction = interaction;
        state.workflow_status = WorkflowStatus::Tutoring;
        let input_summary = format!("Query: {}", state.query);
        log_agent_execution(
            &mut state,
            "Tutor",
            input_summary,
            format!(
                "Interaction: {}, {} elements",
                interaction_type.as_str(),
                elements.len()
            ),
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

    fn state_with_answer() -> WorkflowState {
        let mut state = WorkflowState::new("What is a monad?", "c", "sess", 3);
        state.final_answer.insert(
            "introduction".into(),
            Value::String("Monads sequence computations.".into()),
        );
        state.final_answer.insert(
            "step_by_step_solution".into(),
            Value::String("A monad is a type with bind and return.".into()),
        );
        state
    }

    fn tutor_llm() -> MockLlm {
        MockLlm::new("unexpected prompt")
            .with_rule("Socratic tutor", "QUESTION: What happens when you chain two Options?")
            .with_rule(
                "learning tips",
                "TIP: Re-derive bind by hand.\nTIP: Compare with function composition.\nTIP: Write a small parser.\nTIP: extra tip",
            )
            .with_rule(
                "copying homework",
                "SIMILARITY: 0.95\nPATTERN: yes\nRECOMMENDATION: test",
            )
            .with_rule(
                "quiz questions",
                "QUESTION_1: What does bind do?\nOPTIONS_1: A) maps B) sequences C) folds D) zips\nCORRECT_1: B\nEXPLANATION_1: bind sequences effects\nQUESTION_2: What is return?\nOPTIONS_2: A) wrap B) unwrap C) drop D) copy\nCORRECT_2: A\nEXPLANATION_2: return wraps a value",
            )
    }

    /// **Scenario**: First interaction is a guide with a warm-up question,
    /// the answer element, and at most three tips.
    #[tokio::test]
    async fn first_interaction_is_guide() {
        let node = TutorNode::new(Arc::new(tutor_llm()));
        let (state, _) = node.run(state_with_answer(), &RunContext::detached()).await.unwrap();

        assert_eq!(state.tutor_interaction["interaction_type"], "guide");
        let elements = state.tutor_interaction["elements"].as_array().unwrap();
        assert_eq!(elements[0]["type"], "text");
        assert!(elements[0]["content"]
            .as_str()
            .unwrap()
            .contains("chain two Options"));
        assert_eq!(elements[1]["type"], "answer");
        let tips = elements.iter().filter(|e| {
            e["type"] == "text" && e["content"].as_str().unwrap_or("").starts_with('💡')
        });
        assert_eq!(tips.count(), 3);
        assert_eq!(state.workflow_status, WorkflowStatus::Tutoring);
    }

    /// **Scenario**: A detected copying pattern with a test recommendation
    /// inserts the two-question quiz.
    #[tokio::test]
    async fn copying_pattern_gets_quiz() {
        let node = TutorNode::new(Arc::new(tutor_llm()));
        let mut state = state_with_answer();
        state.prior_queries = vec!["What is a monad?".into(), "what is a monad please".into()];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();

        assert_eq!(state.tutor_interaction["interaction_type"], "test");
        let elements = state.tutor_interaction["elements"].as_array().unwrap();
        let quiz = elements.iter().find(|e| e["type"] == "quiz").unwrap();
        assert_eq!(quiz["content"]["questions"].as_array().unwrap().len(), 2);
    }

    /// **Scenario**: A warn recommendation yields discipline: cooldown message
    /// and no guide question.
    #[tokio::test]
    async fn warn_recommendation_disciplines() {
        let llm = MockLlm::new("unexpected prompt")
            .with_rule(
                "copying homework",
                "SIMILARITY: 0.99\nPATTERN: yes\nRECOMMENDATION: warn",
            )
            .with_rule("learning tips", "TIP: Slow down and reread the notes.");
        let node = TutorNode::new(Arc::new(llm));
        let mut state = state_with_answer();
        state.prior_queries = vec!["What is a monad?".into()];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();

        assert_eq!(state.tutor_interaction["interaction_type"], "discipline");
        let elements = state.tutor_interaction["elements"].as_array().unwrap();
        assert_eq!(elements[0]["type"], "answer");
        assert!(elements
            .iter()
            .any(|e| e["type"] == "cooldown_message"
                && e["content"].as_str().unwrap().contains("taking a break")));
    }

    /// **Scenario**: Three exact repeats trigger testing without the LLM.
    #[tokio::test]
    async fn exact_repeats_trigger_test_deterministically() {
        let llm = tutor_llm();
        let node = TutorNode::new(Arc::new(llm));
        let mut state = state_with_answer();
        state.prior_queries = vec![
            "What is a monad?".into(),
            "What is a monad?".into(),
            "What is a monad?".into(),
        ];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert_eq!(state.tutor_interaction["interaction_type"], "test");
    }

    /// **Scenario**: Pattern-analysis failure degrades to a standard turn
    /// with the answer still present.
    #[tokio::test]
    async fn llm_failure_degrades_to_standard() {
        #[derive(Debug)]
        struct FailingLlm;
        #[async_trait]
        impl ChatClient for FailingLlm {
            fn model(&self) -> &str {
                "failing"
            }
            async fn generate(
                &self,
                _prompt: &str,
                _temperature: Option<f32>,
            ) -> Result<String, AgentError> {
                Err(AgentError::Fatal("down".into()))
            }
        }
        let node = TutorNode::new(Arc::new(FailingLlm));
        let mut state = state_with_answer();
        state.prior_queries = vec!["earlier question".into()];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();

        assert_eq!(state.tutor_interaction["interaction_type"], "standard");
        let elements = state.tutor_interaction["elements"].as_array().unwrap();
        assert!(elements.iter().any(|e| e["type"] == "answer"));
    }
}
