//! Moderator agent: arbiter of the debate loop.
//!
//! The LLM proposes a decision; a fixed rule cascade may override it. The
//! severity arithmetic uses the tabulated score map in `crate::state` — it is
//! never re-derived from LLM output. This is the only component that writes
//! `moderator_decision`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::{generate_with_retry, ChatClient};
use crate::state::{
    log_agent_execution, Critique, ModeratorDecision, Severity, SeverityCounts, WorkflowState,
};

/// Feedback shorter than this is considered empty and regenerated.
const MIN_FEEDBACK_CHARS: usize = 20;

const DECISION_PROMPT: &str = r#"You are a debate moderator controlling the quality assurance process.
Analyze critiques and make strategic decisions about the debate flow.

Decision options:
- converged: Draft is acceptable (ONLY low severity or no issues)
- iterate: Draft needs revision (medium, high, or critical issues found)
- abort_deadlock: Cannot converge after max attempts
- escalate_with_warning: Serious quality concerns

CRITICAL RULES:
- If ANY medium, high, or critical issues exist: ALWAYS choose 'iterate'
- Only choose 'converged' if ALL issues are low severity or no issues found
- Be strict about quality standards

Query: {query}

Current Round: {current_round} / {max_rounds}

Draft Summary:
{draft_summary}

Critiques Found:
{critiques}

Critique Statistics:
- Critical issues: {critical_count}
- High severity: {high_count}
- Medium severity: {medium_count}
- Low severity: {low_count}

Previous Iterations: {has_previous}

Make a decision and provide:
DECISION: [converged/iterate/abort_deadlock/escalate_with_warning]
REASONING: [Your reasoning]
FEEDBACK: [Specific actionable feedback for strategist if iterating]
CONVERGENCE_SCORE: [0.XX]

IMPORTANT: If DECISION is 'iterate', provide clear, specific feedback about what needs to be fixed."#;

const FEEDBACK_PROMPT: &str = r#"Generate specific, actionable feedback for draft revision based on ACTUAL issues found.

CRITICAL INSTRUCTIONS:
1. Read the actual issues provided below carefully
2. Generate feedback based ONLY on the real issues listed
3. Do NOT use placeholder text like "[Specific concept X]" or "[Specific claim Y]"
4. Provide concrete, actionable advice based on the actual problems

ACTUAL Critical Issues Found:
{critical_issues}

ACTUAL High Priority Issues Found:
{high_issues}

TASK: Write specific feedback for the strategist in plain English.

Requirements:
1. Write actual feedback text, not code or templates
2. Reference the problems listed above specifically
3. Provide concrete revision instructions
4. Write as if speaking to a human

Example format:
1. Fix the logical issue in step 2 by explaining why...
2. Correct the factual error about... by checking the source material...
3. Remove the unsupported claim about... since it's not in the context...

Write ONLY plain text feedback."#;

/// Decides convergence, iteration, deadlock, or escalation each round.
pub struct ModeratorNode {
    llm: Arc<dyn ChatClient>,
    convergence_threshold: f64,
    critical_threshold: usize,
}

impl ModeratorNode {
    pub fn new(llm: Arc<dyn ChatClient>, convergence_threshold: f64, critical_threshold: usize) -> Self {
        Self {
            llm,
            convergence_threshold,
            critical_threshold,
        }
    }

    async fn detailed_feedback(&self, critiques: &[Critique]) -> Option<String> {
        let critical: Vec<&Critique> = critiques
            .iter()
            .filter(|c| c.severity == Severity::Critical)
            .collect();
        let mut high: Vec<&Critique> = critiques
            .iter()
            .filter(|c| c.severity == Severity::High)
            .collect();
        if critical.is_empty() && high.is_empty() {
            high = critiques
                .iter()
                .filter(|c| c.severity == Severity::Medium)
                .collect();
        }

        let fmt = |items: &[&Critique]| {
            if items.is_empty() {
                "None".to_string()
            } else {
                format_critiques_refs(items)
            }
        };
        let prompt = FEEDBACK_PROMPT
            .replace("{critical_issues}", &fmt(&critical))
            .replace("{high_issues}", &fmt(&high));

        match generate_with_retry(self.llm.as_ref(), &prompt, Some(0.3)).await {
            Ok(feedback) if feedback.trim().len() >= MIN_FEEDBACK_CHARS => Some(feedback),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "detailed feedback generation failed");
                None
            }
        }
    }
}

/// Parses the four decision fields; defaults to iterate with score 0.5.
fn parse_decision(response: &str) -> (ModeratorDecision, String, String, f64) {
    let mut decision = ModeratorDecision::Iterate;
    let mut reasoning = String::new();
    let mut feedback = String::new();
    let mut score = 0.5;

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("DECISION:") {
            decision = match rest.trim().to_lowercase().as_str() {
                "converged" => ModeratorDecision::Converged,
                "iterate" => ModeratorDecision::Iterate,
                "abort_deadlock" => ModeratorDecision::AbortDeadlock,
                "escalate_with_warning" => ModeratorDecision::EscalateWithWarning,
                _ => decision,
            };
        } else if let Some(rest) = line.strip_prefix("REASONING:") {
            reasoning = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("FEEDBACK:") {
            feedback = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("CONVERGENCE_SCORE:") {
            if let Ok(parsed) = rest.trim().parse::<f64>() {
                score = parsed;
            }
        }
    }
    (decision, reasoning, feedback, score.clamp(0.0, 1.0))
}

/// The hard rule cascade, applied in order; first match wins.
fn apply_decision_rules(
    llm_decision: ModeratorDecision,
    counts: SeverityCounts,
    current_round: u32,
    max_rounds: u32,
    convergence_threshold: f64,
    critical_threshold: usize,
) -> ModeratorDecision {
    // Rule 1: out of rounds.
    if current_round >= max_rounds {
        return ModeratorDecision::AbortDeadlock;
    }
    // Rule 2: cannot converge past critical issues.
    if llm_decision == ModeratorDecision::Converged && counts.critical > 0 {
        return if current_round < max_rounds {
            ModeratorDecision::Iterate
        } else {
            ModeratorDecision::EscalateWithWarning
        };
    }
    // Rule 3: too many critical issues.
    if counts.critical >= critical_threshold {
        return ModeratorDecision::EscalateWithWarning;
    }
    // Rule 4: low aggregate severity and the LLM agrees.
    if counts.aggregate_score() < convergence_threshold
        && llm_decision == ModeratorDecision::Converged
    {
        return ModeratorDecision::Converged;
    }
    // Rule 5: only low-severity findings (or none) remain.
    if counts.critical + counts.high + counts.medium == 0 {
        return ModeratorDecision::Converged;
    }
    // Rule 6: defer to the LLM.
    llm_decision
}

fn format_critiques(critiques: &[Critique]) -> String {
    format_critiques_refs(&critiques.iter().collect::<Vec<_>>())
}

fn format_critiques_refs(critiques: &[&Critique]) -> String {
    if critiques.is_empty() {
        return "No issues".to_string();
    }
    critiques
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let severity = c.severity.as_str().to_uppercase();
            match (&c.step_ref, &c.claim) {
                (Some(step), _) => {
                    format!("{}. [{severity}] Step {step}: {}", i + 1, c.description)
                }
                (None, Some(claim)) => {
                    format!("{}. [{severity}] Claim '{claim}': {}", i + 1, c.description)
                }
                (None, None) => format!(
                    "{}. [{severity}] {}: {}",
                    i + 1,
                    c.kind.as_str(),
                    c.description
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Templated fallback when feedback generation fails.
fn simple_feedback(counts: SeverityCounts) -> String {
    let mut parts = Vec::new();
    if counts.critical > 0 {
        parts.push(format!(
            "Address {} critical issues that prevent acceptance.",
            counts.critical
        ));
    }
    if counts.high > 0 {
        parts.push(format!("Fix {} high-priority issues.", counts.high));
    }
    if counts.medium > 0 {
        parts.push(format!(
            "Consider resolving {} medium-priority issues.",
            counts.medium
        ));
    }
    if parts.is_empty() {
        return "Minor revisions suggested based on low-priority feedback.".to_string();
    }
    parts.join(" ")
}

#[async_trait]
impl Node<WorkflowState> for ModeratorNode {
    fn id(&self) -> &str {
        "moderator"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        ctx: &RunContext<WorkflowState>,
    ) -> Result<(WorkflowState, Next), AgentError> {
        let started = Instant::now();
        let counts = state.severity_counts();

        ctx.emit_custom(json!({
            "stage": "moderator",
            "agent": "moderator",
            "message": format!("Moderating debate (round {}/{})...", state.current_round, state.max_rounds),
        }));

        let draft_summary = state
            .draft
            .as_ref()
            .map(|d| d.content.clone())
            .unwrap_or_else(|| "No draft".to_string());
        let prompt = DECISION_PROMPT
            .replace("{query}", &state.query)
            .replace("{current_round}", &state.current_round.to_string())
            .replace("{max_rounds}", &state.max_rounds.to_string())
            .replace("{draft_summary}", &draft_summary)
            .replace("{critiques}", &format_critiques(&state.critiques))
            .replace("{critical_count}", &counts.critical.to_string())
            .replace("{high_count}", &counts.high.to_string())
            .replace("{medium_count}", &counts.medium.to_string())
            .replace("{low_count}", &counts.low.to_string())
            .replace(
                "{has_previous}",
                if state.moderator_feedback.is_some() {
                    "Yes"
                } else {
                    "No"
                },
            );

        // A decision is always produced: an LLM failure parses as the
        // defaults and goes through the rule cascade like any response.
        let response = match generate_with_retry(self.llm.as_ref(), &prompt, Some(0.2)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "decision call failed, applying rules to defaults");
                state
                    .error_messages
                    .push(format!("Moderator decision call failed: {e}"));
                String::new()
            }
        };

        let (llm_decision, reasoning, mut feedback, score) = parse_decision(&response);
        let decision = apply_decision_rules(
            llm_decision,
            counts,
            state.current_round,
            state.max_rounds,
            self.convergence_threshold,
            self.critical_threshold,
        );
        if decision != llm_decision {
            info!(
                llm = llm_decision.as_str(),
                rule = decision.as_str(),
                "decision rules overrode llm proposal"
            );
        }

        if decision == ModeratorDecision::Iterate {
            if feedback.trim().len() < MIN_FEEDBACK_CHARS {
                feedback = self
                    .detailed_feedback(&state.critiques)
                    .await
                    .unwrap_or_else(|| simple_feedback(counts));
            }
            state.moderator_feedback = Some(feedback);
            // Advance the round before re-entering the strategist.
            state.current_round += 1;
        } else {
            state.moderator_feedback = None;
        }
        state.moderator_decision = decision;
        state.convergence_score = score;

        info!(
            decision = decision.as_str(),
            reasoning = %reasoning,
            convergence_score = score,
            "moderation decision"
        );

        ctx.emit_custom(json!({
            "stage": "moderator",
            "agent": "moderator",
            "message": format!("Decision: {}", decision.as_str()),
            "details": {
                "type": "moderation_complete",
                "decision": decision.as_str(),
                "convergence_score": score,
                "round": state.current_round,
            },
        }));

        let input_summary = format!(
            "Round {}/{}, {} critiques",
            state.current_round,
            state.max_rounds,
            state.critiques.len()
        );
        log_agent_execution(
            &mut state,
            "Moderator",
            input_summary,
            format!("Decision: {}, Score: {:.2}", decision.as_str(), score),
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
    use crate::state::CritiqueKind;

    fn counts(critical: usize, high: usize, medium: usize, low: usize) -> SeverityCounts {
        SeverityCounts {
            critical,
            high,
            medium,
            low,
        }
    }

    /// **Scenario**: Rule 1 — at max rounds the decision is always deadlock.
    #[test]
    fn rule1_forces_deadlock_at_max_rounds() {
        for llm in [
            ModeratorDecision::Converged,
            ModeratorDecision::Iterate,
            ModeratorDecision::EscalateWithWarning,
        ] {
            assert_eq!(
                apply_decision_rules(llm, counts(0, 0, 0, 0), 3, 3, 0.3, 2),
                ModeratorDecision::AbortDeadlock
            );
        }
    }

    /// **Scenario**: Rule 2 — a proposed convergence with critical issues is
    /// overridden to iterate.
    #[test]
    fn rule2_blocks_convergence_with_criticals() {
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Converged, counts(1, 0, 0, 0), 1, 3, 0.3, 2),
            ModeratorDecision::Iterate
        );
    }

    /// **Scenario**: Rule 3 — critical count at the threshold escalates.
    #[test]
    fn rule3_escalates_on_critical_threshold() {
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Iterate, counts(2, 0, 0, 0), 1, 3, 0.3, 2),
            ModeratorDecision::EscalateWithWarning
        );
    }

    /// **Scenario**: Rule 4 — low aggregate severity converges only when the
    /// LLM also proposed convergence.
    #[test]
    fn rule4_needs_llm_agreement() {
        // One low critique: aggregate 0.2 < 0.3.
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Converged, counts(0, 0, 0, 1), 1, 3, 0.3, 2),
            ModeratorDecision::Converged
        );
        // Same counts but LLM proposed iterate: rule 5 still converges (lows only).
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Iterate, counts(0, 0, 0, 1), 1, 3, 0.3, 2),
            ModeratorDecision::Converged
        );
    }

    /// **Scenario**: With a zero convergence threshold, only empty critique
    /// lists pass rule 4; lows still converge via rule 5.
    #[test]
    fn zero_threshold_only_empty_converges_via_aggregate() {
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Converged, counts(0, 0, 0, 0), 1, 3, 0.0, 2),
            ModeratorDecision::Converged
        );
        // 0.2 aggregate is not < 0.0, so rule 4 does not fire; rule 5 does.
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Converged, counts(0, 0, 0, 1), 1, 3, 0.0, 2),
            ModeratorDecision::Converged
        );
        // Medium issues with zero threshold defer to the LLM.
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Iterate, counts(0, 0, 1, 0), 1, 3, 0.0, 2),
            ModeratorDecision::Iterate
        );
    }

    /// **Scenario**: Rule 6 — otherwise the LLM proposal stands.
    #[test]
    fn rule6_defers_to_llm() {
        assert_eq!(
            apply_decision_rules(ModeratorDecision::Iterate, counts(0, 1, 0, 0), 1, 3, 0.3, 2),
            ModeratorDecision::Iterate
        );
        assert_eq!(
            apply_decision_rules(
                ModeratorDecision::EscalateWithWarning,
                counts(1, 0, 0, 0),
                1,
                3,
                0.3,
                2
            ),
            ModeratorDecision::EscalateWithWarning
        );
    }

    /// **Scenario**: The decision fields parse; unknown decisions and bad
    /// scores keep defaults.
    #[test]
    fn parse_decision_fields() {
        let (d, r, f, s) = parse_decision(
            "DECISION: converged\nREASONING: all minor\nFEEDBACK: none needed\nCONVERGENCE_SCORE: 0.15",
        );
        assert_eq!(d, ModeratorDecision::Converged);
        assert_eq!(r, "all minor");
        assert_eq!(f, "none needed");
        assert!((s - 0.15).abs() < 1e-9);

        let (d, _, _, s) = parse_decision("DECISION: maybe\nCONVERGENCE_SCORE: pretty high");
        assert_eq!(d, ModeratorDecision::Iterate);
        assert!((s - 0.5).abs() < 1e-9);
    }

    /// **Scenario**: Empty critique list with rounds remaining converges
    /// (round-trip law), and the state round does not advance.
    #[tokio::test]
    async fn empty_critiques_converge() {
        let llm = MockLlm::new("DECISION: converged\nREASONING: clean\nFEEDBACK:\nCONVERGENCE_SCORE: 0.1");
        let node = ModeratorNode::new(Arc::new(llm), 0.3, 2);
        let state = WorkflowState::new("q", "c", "s", 3);
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert_eq!(state.moderator_decision, ModeratorDecision::Converged);
        assert_eq!(state.current_round, 1);
        assert!(state.moderator_feedback.is_none());
    }

    /// **Scenario**: Any critical critique prevents convergence.
    #[tokio::test]
    async fn critical_critique_never_converges() {
        let llm = MockLlm::new("DECISION: converged\nCONVERGENCE_SCORE: 0.1");
        let node = ModeratorNode::new(Arc::new(llm), 0.3, 2);
        let mut state = WorkflowState::new("q", "c", "s", 3);
        state.critiques = vec![Critique {
            kind: CritiqueKind::FactContradiction,
            severity: Severity::Critical,
            description: "wrong premise".into(),
            step_ref: Some(1),
            claim: Some("bad claim".into()),
        }];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert_ne!(state.moderator_decision, ModeratorDecision::Converged);
    }

    /// **Scenario**: Iterating with thin LLM feedback regenerates it and
    /// advances the round; a failing feedback chain falls back to the
    /// severity template.
    #[tokio::test]
    async fn iterate_regenerates_feedback_and_advances_round() {
        let llm = MockLlm::new("DECISION: iterate\nFEEDBACK: fix\nCONVERGENCE_SCORE: 0.6")
            .with_rule(
                "actionable feedback for draft revision",
                "1. Correct the factual error about the premise by checking source material.",
            );
        let node = ModeratorNode::new(Arc::new(llm), 0.3, 2);
        let mut state = WorkflowState::new("q", "c", "s", 3);
        state.critiques = vec![Critique {
            kind: CritiqueKind::LogicFlaw,
            severity: Severity::High,
            description: "unsupported leap".into(),
            step_ref: Some(2),
            claim: None,
        }];
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert_eq!(state.moderator_decision, ModeratorDecision::Iterate);
        assert_eq!(state.current_round, 2);
        assert!(state
            .moderator_feedback
            .as_deref()
            .unwrap()
            .contains("factual error"));
    }

    /// **Scenario**: max_rounds = 1 never yields iterate.
    #[tokio::test]
    async fn single_round_never_iterates() {
        let llm = MockLlm::new("DECISION: iterate\nCONVERGENCE_SCORE: 0.9");
        let node = ModeratorNode::new(Arc::new(llm), 0.3, 2);
        let state = WorkflowState::new("q", "c", "s", 1);
        let (state, _) = node.run(state, &RunContext::detached()).await.unwrap();
        assert!(matches!(
            state.moderator_decision,
            ModeratorDecision::Converged | ModeratorDecision::AbortDeadlock
        ));
    }

    /// **Scenario**: The severity-template fallback names the counts.
    #[test]
    fn simple_feedback_from_counts() {
        let text = simple_feedback(counts(1, 2, 3, 0));
        assert!(text.contains("1 critical"));
        assert!(text.contains("2 high-priority"));
        assert!(text.contains("3 medium-priority"));
        assert_eq!(
            simple_feedback(counts(0, 0, 0, 1)),
            "Minor revisions suggested based on low-priority feedback."
        );
    }
}
