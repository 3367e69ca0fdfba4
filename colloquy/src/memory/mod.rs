//! Session-scoped checkpointing.
//!
//! The only process-wide mutable state in the engine is the session-keyed
//! checkpoint map used for streaming: the graph saves the state after each
//! node so consumers can query partial progress mid-run. Writes are owned by
//! the single node currently executing for that session; nothing is shared
//! across sessions.

mod checkpointer;
mod config;
mod memory_saver;

pub use checkpointer::{CheckpointError, Checkpointer};
pub use config::RunnableConfig;
pub use memory_saver::MemorySaver;
