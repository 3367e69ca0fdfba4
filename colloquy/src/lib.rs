//! Colloquy: a multi-agent retrieval-augmented reasoning engine.
//!
//! Answers course-scoped questions by orchestrating a bounded debate between
//! cooperating agents over a single typed state:
//!
//! ```text
//! retrieve → strategist → critic → moderator ─┬→ strategist (iterate)
//!                                             └→ reporter → tutor → END
//! ```
//!
//! - **retrieve** runs the speculative retrieval chain: initial search,
//!   deterministic quality scoring, conditional LLM reframing, parallel
//!   alternative searches, merge and rerank.
//! - **strategist** drafts a solution with explicit chain-of-thought.
//! - **critic** verifies logic, facts, and hallucinations in parallel and
//!   synthesizes one critique list.
//! - **moderator** decides converge / iterate / deadlock / escalate through a
//!   fixed rule cascade over severity counts.
//! - **reporter** synthesizes the structured final answer, streaming its
//!   content token by token.
//! - **tutor** wraps the answer in a learning interaction.
//!
//! [`Engine::run_stream`] drives the graph and yields progress, content, and
//! terminal events; [`Engine::run_sse`] frames them as `data: <json>\n\n`.
//!
//! # Example
//!
//! ```rust,no_run
//! use colloquy::{Engine, EngineRequest};
//! use env_config::EngineEnv;
//! use tokio_stream::StreamExt;
//!
//! # async fn demo() -> Result<(), colloquy::AgentError> {
//! env_config::load_and_apply("colloquy", None).ok();
//! let engine = Engine::from_env(EngineEnv::from_env())?;
//! let mut events = engine.run_stream(EngineRequest::new(
//!     "Explain backpropagation.",
//!     "course-42",
//!     "session-1",
//! ));
//! while let Some(event) = events.next().await {
//!     println!("{}", stream_event::sse_frame(&event));
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod channels;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod run;
pub mod state;
pub mod stream;
pub mod workflow;

pub use error::AgentError;
pub use run::{Engine, EngineRequest, Mode};
pub use state::{
    Critique, CritiqueKind, Draft, ModeratorDecision, RetrievalResult, Severity, WorkflowState,
    WorkflowStatus,
};
