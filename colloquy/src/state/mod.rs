//! Workflow state: the single record threaded through every graph node.
//!
//! Nodes receive the state by value, mutate their slice of it, and return it;
//! the graph merges the result with an append/override reducer (logs append,
//! scalars override — see [`workflow_state_updater`]). The moderator is the
//! only node that writes `moderator_decision`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::FieldBasedUpdater;

/// Coarse position of the run, written by the node currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Retrieving,
    Drafting,
    Critiquing,
    Debating,
    Synthesizing,
    Tutoring,
    Complete,
    Failed,
}

/// One scored chunk from the course corpus.
///
/// `source` is canonicalized as `"<document_id>:chunk_<index>"` when the
/// metadata carries both parts. Scores are the retriever's similarity values
/// in [0,1] and are preserved end-to-end; nothing renormalizes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub score: f64,
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl RetrievalResult {
    /// Builds the canonical source tag from metadata, falling back to the
    /// metadata `source` field, then `"unknown"`.
    pub fn canonical_source(metadata: &serde_json::Map<String, Value>) -> String {
        let doc_id = metadata.get("document_id").and_then(Value::as_str);
        let chunk_idx = metadata.get("chunk_index");
        match (doc_id, chunk_idx) {
            (Some(id), Some(idx)) if !id.is_empty() && !idx.is_null() => {
                let idx = idx
                    .as_u64()
                    .map(|n| n.to_string())
                    .or_else(|| idx.as_str().map(str::to_string))
                    .unwrap_or_default();
                if idx.is_empty() {
                    return fallback_source(metadata);
                }
                format!("{id}:chunk_{idx}")
            }
            _ => fallback_source(metadata),
        }
    }
}

fn fallback_source(metadata: &serde_json::Map<String, Value>) -> String {
    metadata
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// One numbered reasoning step in a draft's chain of thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotStep {
    pub step: u32,
    pub thought: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// Draft solution produced by the strategist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub draft_id: String,
    pub content: String,
    #[serde(default)]
    pub chain_of_thought: Vec<CotStep>,
}

/// Critique categories. Only fact contradictions carry a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueKind {
    LogicFlaw,
    FactContradiction,
    Hallucination,
}

impl CritiqueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogicFlaw => "logic_flaw",
            Self::FactContradiction => "fact_contradiction",
            Self::Hallucination => "hallucination",
        }
    }
}

/// Severity ladder with the fixed numeric score map used by the moderator.
/// The map is tabulated here once so no other component re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Critical => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Lenient parse used on LLM output; anything unrecognized is `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

/// A single finding from the critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    #[serde(rename = "type")]
    pub kind: CritiqueKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub step_ref: Option<u32>,
    /// Populated for `fact_contradiction`, absent otherwise.
    #[serde(default)]
    pub claim: Option<String>,
}

/// Moderator decision alphabet plus the pre-decision `Pending` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorDecision {
    Pending,
    Converged,
    Iterate,
    AbortDeadlock,
    EscalateWithWarning,
}

impl ModeratorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Converged => "converged",
            Self::Iterate => "iterate",
            Self::AbortDeadlock => "abort_deadlock",
            Self::EscalateWithWarning => "escalate_with_warning",
        }
    }

    /// True for the three decisions that route to the reporter.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::AbortDeadlock | Self::EscalateWithWarning
        )
    }
}

/// One entry in the append-only conversation/audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_name: String,
    pub input_summary: String,
    pub output_summary: String,
    /// Wall-clock seconds spent inside the agent.
    pub processing_time: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// The workflow state. Created at `run()` entry, mutated only by the node
/// currently executing, discarded after the final event is emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    // Identity
    pub query: String,
    pub course_id: String,
    pub session_id: String,
    #[serde(default)]
    pub course_prompt: Option<String>,
    /// Prior user queries supplied by the caller for tutor pattern analysis.
    #[serde(default)]
    pub prior_queries: Vec<String>,

    // Retrieval
    #[serde(default)]
    pub retrieval_results: Vec<RetrievalResult>,
    #[serde(default)]
    pub retrieval_quality_score: f64,
    #[serde(default)]
    pub retrieval_strategy: String,
    #[serde(default)]
    pub speculative_queries: Vec<String>,

    // Debate
    #[serde(default)]
    pub draft: Option<Draft>,
    #[serde(default)]
    pub critiques: Vec<Critique>,
    pub moderator_decision: ModeratorDecision,
    #[serde(default)]
    pub moderator_feedback: Option<String>,
    #[serde(default)]
    pub convergence_score: f64,
    pub current_round: u32,
    pub max_rounds: u32,

    // Finalization
    #[serde(default)]
    pub final_answer: serde_json::Map<String, Value>,
    #[serde(default)]
    pub tutor_interaction: serde_json::Map<String, Value>,

    // Bookkeeping
    #[serde(default)]
    pub conversation_history: Vec<AgentExecution>,
    #[serde(default)]
    pub processing_times: BTreeMap<String, f64>,
    #[serde(default)]
    pub error_messages: Vec<String>,
    pub workflow_status: WorkflowStatus,
}

impl WorkflowState {
    /// Fresh state for one run. `current_round` starts at 1; the moderator
    /// advances it when (and only when) it decides to iterate.
    pub fn new(
        query: impl Into<String>,
        course_id: impl Into<String>,
        session_id: impl Into<String>,
        max_rounds: u32,
    ) -> Self {
        Self {
            query: query.into(),
            course_id: course_id.into(),
            session_id: session_id.into(),
            course_prompt: None,
            prior_queries: Vec::new(),
            retrieval_results: Vec::new(),
            retrieval_quality_score: 0.0,
            retrieval_strategy: String::new(),
            speculative_queries: Vec::new(),
            draft: None,
            critiques: Vec::new(),
            moderator_decision: ModeratorDecision::Pending,
            moderator_feedback: None,
            convergence_score: 0.0,
            current_round: 1,
            max_rounds: max_rounds.max(1),
            final_answer: serde_json::Map::new(),
            tutor_interaction: serde_json::Map::new(),
            conversation_history: Vec::new(),
            processing_times: BTreeMap::new(),
            error_messages: Vec::new(),
            workflow_status: WorkflowStatus::Retrieving,
        }
    }

    /// Severity tally over the current critiques, in `(critical, high, medium, low)` order.
    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for c in &self.critiques {
            match c.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    /// Total wall time recorded by the agents.
    pub fn total_processing_time(&self) -> f64 {
        self.processing_times.values().sum()
    }
}

/// Per-severity critique counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    /// Aggregate severity: `Σ count(sev) · score(sev)` with the fixed map.
    pub fn aggregate_score(&self) -> f64 {
        self.critical as f64 * Severity::Critical.score()
            + self.high as f64 * Severity::High.score()
            + self.medium as f64 * Severity::Medium.score()
            + self.low as f64 * Severity::Low.score()
    }
}

/// Appends one entry to the audit log and accumulates the agent's wall time.
/// Earlier entries are never touched.
pub fn log_agent_execution(
    state: &mut WorkflowState,
    agent_name: &str,
    input_summary: impl Into<String>,
    output_summary: impl Into<String>,
    processing_time: f64,
    success: bool,
) {
    state.conversation_history.push(AgentExecution {
        agent_name: agent_name.to_string(),
        input_summary: input_summary.into(),
        output_summary: output_summary.into(),
        processing_time,
        success,
        timestamp: Utc::now(),
    });
    *state
        .processing_times
        .entry(agent_name.to_string())
        .or_insert(0.0) += processing_time;
}

/// Extends an append-only log with the update's new entries.
///
/// Nodes normally return the log they received plus their own entries, in
/// which case only the tail is appended; a node returning just its delta is
/// appended wholesale.
fn append_new<T: Clone>(current: &mut Vec<T>, update: &[T]) {
    if update.len() >= current.len() {
        current.extend_from_slice(&update[current.len()..]);
    } else {
        current.extend_from_slice(update);
    }
}

/// The reducer installed on the workflow graph: append-only logs grow,
/// everything else takes the updating node's value.
pub fn workflow_state_updater() -> FieldBasedUpdater<WorkflowState> {
    FieldBasedUpdater::new(|current: &mut WorkflowState, update: &WorkflowState| {
        let mut merged = update.clone();
        let mut history = std::mem::take(&mut current.conversation_history);
        append_new(&mut history, &merged.conversation_history);
        merged.conversation_history = history;

        let mut errors = std::mem::take(&mut current.error_messages);
        append_new(&mut errors, &merged.error_messages);
        merged.error_messages = errors;

        for (agent, secs) in &current.processing_times {
            merged.processing_times.entry(agent.clone()).or_insert(*secs);
        }

        *current = merged;
    })
}
