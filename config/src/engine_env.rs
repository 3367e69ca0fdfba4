//! Typed view of the engine's recognized environment variables.
//!
//! Read once after [`crate::load_and_apply`]; the engine threads the resulting
//! [`EngineEnv`] through construction instead of consulting the environment at
//! call sites. All fields are optional except that at least one LLM key and
//! the vector-store coordinates must be present for a working deployment.

use crate::LoadError;

/// Engine configuration resolved from the environment.
#[derive(Clone, Debug)]
pub struct EngineEnv {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub cerebras_api_key: Option<String>,
    /// Base URL of the vector-store query service.
    pub vector_store_url: Option<String>,
    pub vector_store_api_key: Option<String>,
    /// Aggregate-severity threshold below which the moderator may converge.
    pub convergence_threshold: f64,
    /// Number of critical critiques that triggers escalation.
    pub critical_severity_threshold: usize,
    /// Default maximum debate rounds when the request does not set one.
    pub max_debate_rounds: u32,
    /// Retrieval quality threshold below which speculative reframing runs.
    pub retrieval_quality_threshold: f64,
    /// When set, the final response carries `debug_info`.
    pub debug_logging: bool,
}

impl Default for EngineEnv {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            cerebras_api_key: None,
            vector_store_url: None,
            vector_store_api_key: None,
            convergence_threshold: 0.3,
            critical_severity_threshold: 2,
            max_debate_rounds: 3,
            retrieval_quality_threshold: 0.7,
            debug_logging: false,
        }
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl EngineEnv {
    /// Reads the recognized variables from the process environment, applying
    /// defaults for the numeric knobs.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gemini_api_key: var("GEMINI_API_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            cerebras_api_key: var("CEREBRAS_API_KEY"),
            vector_store_url: var("VECTOR_STORE_URL"),
            vector_store_api_key: var("VECTOR_STORE_API_KEY"),
            convergence_threshold: parse_or(
                "CONVERGENCE_THRESHOLD",
                defaults.convergence_threshold,
            ),
            critical_severity_threshold: parse_or(
                "CRITICAL_SEVERITY_THRESHOLD",
                defaults.critical_severity_threshold,
            ),
            max_debate_rounds: parse_or("MAX_DEBATE_ROUNDS", defaults.max_debate_rounds),
            retrieval_quality_threshold: parse_or(
                "RETRIEVAL_QUALITY_THRESHOLD",
                defaults.retrieval_quality_threshold,
            ),
            debug_logging: var("DEBUG_LOGGING")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.debug_logging),
        }
    }

    /// True when at least one provider key is configured.
    pub fn has_llm_key(&self) -> bool {
        self.gemini_api_key.is_some()
            || self.openai_api_key.is_some()
            || self.anthropic_api_key.is_some()
            || self.cerebras_api_key.is_some()
    }

    /// Validates the minimum deployment requirements: one LLM key and the
    /// vector-store URL.
    pub fn validate(&self) -> Result<(), LoadError> {
        if !self.has_llm_key() {
            return Err(LoadError::Missing(
                "at least one LLM provider API key (GEMINI_API_KEY, OPENAI_API_KEY, \
                 ANTHROPIC_API_KEY, or CEREBRAS_API_KEY)"
                    .into(),
            ));
        }
        if self.vector_store_url.is_none() {
            return Err(LoadError::Missing("VECTOR_STORE_URL".into()));
        }
        Ok(())
    }
}
