//! Critic agent: three independent verification calls in parallel (logic,
//! facts, hallucinations) synthesized into a single critique list.
//!
//! Any single analyzer failure substitutes an empty-issue result; the critic
//! itself never aborts the debate. A keyword diagnostic flags responses that
//! look like canned template examples, as a warning only — never a filter.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::{generate_with_retry, ChatClient};
use crate::state::{
    log_agent_execution, CotStep, Critique, CritiqueKind, RetrievalResult, Severity,
    WorkflowState, WorkflowStatus,
};

const LOGIC_PROMPT: &str = r#"You are a logic verifier that analyzes the ACTUAL content provided.

CRITICAL INSTRUCTIONS:
1. You must read and analyze ONLY the actual draft content provided below
2. Do NOT generate fake examples about "Event A caused Event B" or "X is the largest Y"
3. Do NOT make up problems that don't exist in the actual draft
4. Do NOT use template responses or placeholder critiques
5. If there are NO actual logical issues in the draft, return an empty logic_issues array

Query: {query}

>>> SOLUTION DRAFT TO ANALYZE (ONLY THIS CONTENT CAN BE CRITICIZED) <<<
{draft}
>>> END OF DRAFT <<<

>>> CHAIN OF THOUGHT TO ANALYZE <<<
{cot}
>>> END OF CHAIN OF THOUGHT <<<

Analyze ONLY the draft and chain of thought above. Look for REAL logical issues such as:
- Contradictory statements within the draft
- Logical leaps in the reasoning chain
- Assumptions that aren't supported by prior steps
- Conclusions that don't follow from premises

STEP REFERENCE INSTRUCTIONS:
- The Chain of Thought above has numbered steps like "Step 1:", "Step 2:", etc.
- When you find a logical issue, identify which step number it relates to
- If the issue is not tied to a specific step, set step_ref to null

Return valid JSON:
{
    "logic_issues": [
        {
            "step_ref": <step_number_from_CoT_or_null>,
            "severity": "low/medium/high/critical",
            "description": "<describe the actual logical problem found in the text>",
            "problematic_content": "<exact quote from the actual draft>"
        }
    ],
    "logic_summary": "<summary based on actual analysis>"
}

If you find NO logical issues in the actual draft, return:
{"logic_issues": [], "logic_summary": "No significant logical issues found"}"#;

const FACT_PROMPT: &str = r#"You are a fact checker that verifies ACTUAL claims in the provided draft.

CRITICAL INSTRUCTIONS:
1. Read the actual draft content carefully and identify specific factual claims
2. Check ONLY those actual claims against the provided context
3. Do NOT generate fake fact-check examples like "X is the largest Y"
4. If all facts in the draft are supported by the context, return an empty fact_issues array

Query: {query}

>>> DRAFT TO ANALYZE (ONLY CONTENT FROM THIS SECTION CAN BE CRITICIZED) <<<
{draft}
>>> END OF DRAFT - DO NOT CRITICIZE CONTENT BELOW THIS LINE <<<

>>> REFERENCE CONTEXT (USE ONLY TO VERIFY CLAIMS FROM DRAFT ABOVE) <<<
{context}
>>> END OF CONTEXT - THIS IS REFERENCE MATERIAL, NOT CONTENT TO CRITICIZE <<<

RULES:
1. ONLY analyze claims made in the DRAFT section above
2. NEVER criticize or fact-check content from the CONTEXT section
3. If you see content in CONTEXT, it is CORRECT - do not question it
4. Only report issues where the DRAFT contradicts or lacks support from CONTEXT

STEP REFERENCE INSTRUCTIONS:
- When you find a factual issue, identify which chain-of-thought step number it relates to
- If the issue is not tied to a specific step, set step_ref to null

Return valid JSON:
{
    "fact_issues": [
        {
            "claim": "<exact claim found in the actual draft>",
            "step_ref": <step_number_from_CoT_or_null>,
            "severity": "low/medium/high/critical",
            "description": "<why this claim is incorrect or unsupported based on context>"
        }
    ],
    "fact_summary": "<summary of fact-checking results>"
}

If the draft's claims are supported by context, return:
{"fact_issues": [], "fact_summary": "All facts verified against context"}"#;

const HALLUCINATION_PROMPT: &str = r#"You are a hallucination detector that identifies ACTUAL unsupported content.

CRITICAL INSTRUCTIONS:
1. Compare the draft against the provided context sources
2. Identify content in the draft that has NO support in the context
3. Do NOT make up fake hallucinations about "quantum tunneling" or "Mars colonies"
4. Do NOT flag reasonable inferences or explanations derived from context
5. If the draft is properly supported by context, return an empty hallucinations array

Query: {query}

>>> DRAFT TO CHECK FOR HALLUCINATIONS (ONLY THIS CONTENT CAN BE FLAGGED) <<<
{draft}
>>> END OF DRAFT - DO NOT FLAG CONTENT BELOW THIS LINE <<<

>>> REFERENCE CONTEXT (USE TO VERIFY DRAFT CLAIMS ARE SUPPORTED) <<<
{context}
>>> END OF CONTEXT - THIS IS REFERENCE MATERIAL, NOT CONTENT TO FLAG <<<

STEP REFERENCE INSTRUCTIONS:
- When you find a hallucination, identify which chain-of-thought step number it relates to
- If the issue is not tied to a specific step, set step_ref to null

Return valid JSON:
{
    "hallucinations": [
        {
            "content": "<actual unsupported content from draft>",
            "step_ref": <step_number_from_CoT_or_null>,
            "severity": "low/medium/high/critical",
            "reason": "<why this content is not supported by context>",
            "suggested_fix": "<what should be there based on context>"
        }
    ],
    "hallucination_summary": "<summary of findings>"
}

If the draft IS supported by context, return:
{"hallucinations": [], "hallucination_summary": "Draft content is supported by context"}"#;

const SYNTHESIS_PROMPT: &str = r#"You are a JSON extraction agent. Your ONLY job is to extract existing issues from analysis results.

ABSOLUTE RULES:
1. If ALL analysis results show empty arrays, output an empty critiques array
2. NEVER generate example critiques like "Event A", "Person Z", "Mars colonies", etc.
3. Only extract issues that are explicitly listed in the analysis results
4. Issues must be about problems found in the DRAFT, not about reference context being "wrong" - if an analysis criticizes context content, IGNORE IT

VERIFICATION ANALYSIS RESULTS:

Logic Analysis:
{logic_analysis}

Fact-Checking Analysis:
{fact_analysis}

Hallucination Analysis:
{hallucination_analysis}

STEP 1: If Logic Analysis shows "logic_issues": [] AND Fact Analysis shows "fact_issues": [] AND Hallucination Analysis shows "hallucinations": []
THEN output: {"critiques": [], "overall_assessment": "No issues found", "severity_score": 0.1}

STEP 2: If any analysis found actual issues, extract them exactly as written.

EXTRACTION RULES:
- For logic_issues: use type="logic_flaw", extract step_ref, description. claim is null.
- For fact_issues: use type="fact_contradiction", extract step_ref, description, claim.
- For hallucinations: use type="hallucination", extract step_ref, description. claim is null.

Required JSON format:
{
    "critiques": [
        {
            "type": "logic_flaw/fact_contradiction/hallucination",
            "severity": "low/medium/high/critical",
            "description": "<EXACT description from analysis above>",
            "step_ref": <step_ref_from_analysis_or_null>,
            "claim": "<EXACT claim from analysis or null>"
        }
    ],
    "overall_assessment": "<based on ACTUAL findings>",
    "severity_score": <0.0-1.0>
}

Output ONLY the JSON. Do NOT create fake critiques."#;

const LOGIC_FALLBACK: &str =
    r#"{"logic_issues": [], "logic_summary": "Chain failed", "areas_of_concern": []}"#;
const FACT_FALLBACK: &str =
    r#"{"fact_issues": [], "fact_summary": "Chain failed", "verified_facts": []}"#;
const HALLUCINATION_FALLBACK: &str =
    r#"{"hallucinations": [], "hallucination_summary": "Chain failed"}"#;

/// Keywords that only appear when an analyzer invents canned examples.
const UNRELATED_KEYWORDS: &[&str] = &[
    "Tesla",
    "OpenAI",
    "Microsoft",
    "Mars",
    "planet",
    "population",
    "Q1 2023",
    "vehicles",
    "Event A",
    "Person Z",
    "Earth is flat",
];

#[derive(Deserialize, Default)]
struct SynthesisOutput {
    #[serde(default)]
    critiques: Vec<RawCritique>,
    #[serde(default)]
    overall_assessment: Option<String>,
    #[serde(default)]
    severity_score: Option<f64>,
}

#[derive(Deserialize)]
struct RawCritique {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    step_ref: Option<Value>,
    #[serde(default)]
    claim: Option<String>,
}

/// Verifies a draft from three independent angles concurrently, then merges
/// the findings with one synthesis call.
pub struct CriticNode {
    llm: Arc<dyn ChatClient>,
}

impl CriticNode {
    pub fn new(llm: Arc<dyn ChatClient>) -> Self {
        Self { llm }
    }

    async fn analyze(&self, label: &str, prompt: &str, fallback: &str) -> String {
        match generate_with_retry(self.llm.as_ref(), prompt, Some(0.2)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(analyzer = label, error = %e, "analyzer failed, substituting empty result");
                fallback.to_string()
            }
        }
    }
}

fn format_cot(steps: &[CotStep]) -> String {
    if steps.is_empty() {
        return "No explicit chain of thought provided".to_string();
    }
    steps
        .iter()
        .map(|s| format!("Step {}: {}", s.step, s.thought))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No context available".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}]: {}", i + 1, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Pulls a JSON object out of a possibly fenced response, unwrapping the
/// accidental doubled-brace form some models emit.
fn extract_json(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(start) = text.find("```json") {
        text = &text[start + 7..];
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
    } else if let Some(start) = text.find("```") {
        text = &text[start + 3..];
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
    }
    let text = text.trim();
    if text.starts_with("{{") && text.ends_with("}}") && text.len() >= 4 {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}

fn convert_critiques(raw: Vec<RawCritique>) -> Vec<Critique> {
    raw.into_iter()
        .map(|c| {
            let kind = match c.kind.as_deref() {
                Some("fact_contradiction") => CritiqueKind::FactContradiction,
                Some("hallucination") => CritiqueKind::Hallucination,
                _ => CritiqueKind::LogicFlaw,
            };
            let description = c.description.unwrap_or_default();
            let claim = match kind {
                // A fact contradiction always carries the contested claim;
                // fall back to the description when the model omitted it.
                CritiqueKind::FactContradiction => Some(
                    c.claim
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or_else(|| description.clone()),
                ),
                _ => None,
            };
            Critique {
                kind,
                severity: Severity::parse_lenient(c.severity.as_deref().unwrap_or("medium")),
                description,
                step_ref: c.step_ref.as_ref().and_then(Value::as_u64).map(|n| n as u32),
                claim,
            }
        })
        .collect()
}

fn scan_for_template_examples(label: &str, text: &str) {
    for keyword in UNRELATED_KEYWORDS {
        if text.contains(keyword) {
            warn!(
                analyzer = label,
                keyword,
                "analyzer output contains unrelated keyword; it may be generating canned examples"
            );
            return;
        }
    }
}

#[async_trait]
impl Node<WorkflowState> for CriticNode {
    fn id(&self) -> &str {
        "critic"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(WorkflowState, Next), AgentError> {
        let started = Instant::now();
        let draft = state
            .draft
            .clone()
            .ok_or_else(|| AgentError::node("critic", "no draft to critique"))?;

        ctx.emit_custom(json!({
            "stage": "critic",
            "agent": "critic",
            "message": format!("Running parallel critique pipeline (round {})...", state.current_round),
        }));

        let cot = format_cot(&draft.chain_of_thought);
        let context = format_context(&state.retrieval_results);
        let fill = |template: &str| {
            template
                .replace("{query}", &state.query)
                .replace("{draft}", &draft.content)
                .replace("{cot}", &cot)
                .replace("{context}", &context)
        };

        let logic_prompt = fill(LOGIC_PROMPT);
        let fact_prompt = fill(FACT_PROMPT);
        let hallucination_prompt = fill(HALLUCINATION_PROMPT);

        // The three analyzers are independent; total latency is the slowest
        // of the three plus synthesis, not their sum.
        let (logic, fact, hallucination) = tokio::join!(
            self.analyze("logic", &logic_prompt, LOGIC_FALLBACK),
            self.analyze("fact", &fact_prompt, FACT_FALLBACK),
            self.analyze("hallucination", &hallucination_prompt, HALLUCINATION_FALLBACK),
        );

        scan_for_template_examples("logic", &logic);
        scan_for_template_examples("fact", &fact);
        scan_for_template_examples("hallucination", &hallucination);

        let synthesis_prompt = SYNTHESIS_PROMPT
            .replace("{logic_analysis}", &logic)
            .replace("{fact_analysis}", &fact)
            .replace("{hallucination_analysis}", &hallucination);

        let (critiques, overall_assessment, severity_score) =
            match generate_with_retry(self.llm.as_ref(), &synthesis_prompt, Some(0.1)).await {
                Ok(raw) => match serde_json::from_str::<SynthesisOutput>(&extract_json(&raw)) {
                    Ok(parsed) => (
                        convert_critiques(parsed.critiques),
                        parsed
                            .overall_assessment
                            .unwrap_or_else(|| "Draft requires revision".to_string()),
                        parsed.severity_score.unwrap_or(0.5),
                    ),
                    Err(e) => {
                        warn!(error = %e, "synthesis output unparsable, degrading to empty critiques");
                        (Vec::new(), "Failed to parse critique".to_string(), 0.5)
                    }
                },
                Err(e) => {
                    warn!(error = %e, "synthesis call failed, degrading to empty critiques");
                    (Vec::new(), "Failed to parse critique".to_string(), 0.5)
                }
            };

        info!(
            round = state.current_round,
            count = critiques.len(),
            assessment = %overall_assessment,
            "critique complete"
        );

        state.critiques = critiques;
        state.workflow_status = WorkflowStatus::Debating;

        let counts = state.severity_counts();
        ctx.emit_custom(json!({
            "stage": "critic",
            "agent": "critic",
            "message": format!(
                "Review complete: {} issues found (Critical: {}, High: {}, Medium: {}, Low: {})",
                state.critiques.len(), counts.critical, counts.high, counts.medium, counts.low
            ),
            "details": {
                "type": "critique_complete",
                "draft_id": draft.draft_id,
                "total_critiques": state.critiques.len(),
                "severity_counts": {
                    "critical": counts.critical,
                    "high": counts.high,
                    "medium": counts.medium,
                    "low": counts.low,
                },
                "severity_score": severity_score,
                "overall_assessment": overall_assessment,
                "top_critiques": state.critiques.iter().take(5).map(|c| json!({
                    "type": c.kind.as_str(),
                    "severity": c.severity.as_str(),
                    "description": c.description,
                    "step_ref": c.step_ref,
                })).collect::<Vec<_>>(),
                "round": state.current_round,
            },
        }));

        let input_summary = format!("Draft: {}, Round: {}", draft.draft_id, state.current_round);
        let summary = format!(
            "Found {} issues, severity: {:.2}",
            state.critiques.len(),
            severity_score
        );
        log_agent_execution(
            &mut state,
            "Critic",
            input_summary,
            summary,
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
    use crate::state::Draft;

    fn state_with_draft() -> WorkflowState {
        let mut state = WorkflowState::new("query", "c", "sess", 3);
        state.draft = Some(Draft {
            draft_id: "draft_sess".into(),
            content: "The draft content.".into(),
            chain_of_thought: vec![CotStep {
                step: 1,
                thought: "think".into(),
                details: vec![],
            }],
        });
        state
    }

    const EMPTY_ANALYSES: [(&str, &str); 3] = [
        ("logic verifier", r#"{"logic_issues": [], "logic_summary": "ok"}"#),
        ("fact checker", r#"{"fact_issues": [], "fact_summary": "ok"}"#),
        (
            "hallucination detector",
            r#"{"hallucinations": [], "hallucination_summary": "ok"}"#,
        ),
    ];

    fn mock_with_analyses(synthesis: &str) -> MockLlm {
        let mut llm = MockLlm::new("unexpected prompt");
        for (marker, response) in EMPTY_ANALYSES {
            llm = llm.with_rule(marker, response);
        }
        llm.with_rule("JSON extraction agent", synthesis)
    }

    /// **Scenario**: Fenced JSON and doubled braces both unwrap.
    #[test]
    fn extract_json_unwraps() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("{{\"a\": 1}}"), "{\"a\": 1}");
        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    /// **Scenario**: Kind mapping populates claims for fact contradictions
    /// only; missing fact claims fall back to the description.
    #[test]
    fn convert_enforces_claim_invariant() {
        let raw: Vec<RawCritique> = serde_json::from_str(
            r#"[
                {"type": "logic_flaw", "severity": "high", "description": "leap", "step_ref": 2, "claim": "should be dropped"},
                {"type": "fact_contradiction", "severity": "critical", "description": "wrong date", "claim": "the war ended in 1946"},
                {"type": "fact_contradiction", "severity": "low", "description": "unsupported figure", "claim": null},
                {"type": "hallucination", "severity": "medium", "description": "invented term", "step_ref": null}
            ]"#,
        )
        .unwrap();
        let critiques = convert_critiques(raw);
        assert_eq!(critiques[0].kind, CritiqueKind::LogicFlaw);
        assert!(critiques[0].claim.is_none());
        assert_eq!(critiques[0].step_ref, Some(2));
        assert_eq!(critiques[1].claim.as_deref(), Some("the war ended in 1946"));
        assert_eq!(critiques[2].claim.as_deref(), Some("unsupported figure"));
        assert!(critiques[3].claim.is_none());
    }

    /// **Scenario**: Clean analyses synthesize to zero critiques.
    #[tokio::test]
    async fn clean_draft_yields_no_critiques() {
        let llm = mock_with_analyses(
            r#"{"critiques": [], "overall_assessment": "No issues found", "severity_score": 0.1}"#,
        );
        let node = CriticNode::new(Arc::new(llm));
        let (state, _) = node.run(state_with_draft(), &RunContext::detached()).await.unwrap();
        assert!(state.critiques.is_empty());
        assert_eq!(state.workflow_status, WorkflowStatus::Debating);
        assert!((state.severity_counts().aggregate_score() - 0.0).abs() < 1e-9);
    }

    /// **Scenario**: Synthesis findings land in the state as typed critiques.
    #[tokio::test]
    async fn findings_become_typed_critiques() {
        let llm = mock_with_analyses(
            r#"{"critiques": [{"type": "fact_contradiction", "severity": "high", "description": "claim contradicts source 1", "step_ref": 1, "claim": "X equals Y"}], "overall_assessment": "One contradiction", "severity_score": 0.8}"#,
        );
        let node = CriticNode::new(Arc::new(llm));
        let (state, _) = node.run(state_with_draft(), &RunContext::detached()).await.unwrap();
        assert_eq!(state.critiques.len(), 1);
        assert_eq!(state.critiques[0].kind, CritiqueKind::FactContradiction);
        assert_eq!(state.critiques[0].severity, Severity::High);
        assert_eq!(state.critiques[0].claim.as_deref(), Some("X equals Y"));
    }

    /// **Scenario**: Unparsable synthesis degrades to empty critiques with the
    /// documented assessment, not a node failure.
    #[tokio::test]
    async fn unparsable_synthesis_degrades() {
        let llm = mock_with_analyses("this is not json at all");
        let node = CriticNode::new(Arc::new(llm));
        let (state, _) = node.run(state_with_draft(), &RunContext::detached()).await.unwrap();
        assert!(state.critiques.is_empty());
        let entry = &state.conversation_history[0];
        assert!(entry.output_summary.contains("0 issues"));
    }

    /// **Scenario**: Missing draft is a node error (the strategist must have
    /// run first).
    #[tokio::test]
    async fn missing_draft_is_error() {
        let node = CriticNode::new(Arc::new(MockLlm::new("x")));
        let state = WorkflowState::new("q", "c", "s", 3);
        assert!(node.run(state, &RunContext::detached()).await.is_err());
    }
}
