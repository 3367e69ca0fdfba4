//! State graph: nodes + edges (linear and conditional), compile and run.
//!
//! Build with [`StateGraph`]: add nodes and edges (using [`START`] / [`END`]
//! for entry/exit), optionally conditional edges, then `compile` to get a
//! [`CompiledStateGraph`] with `invoke` and `stream`.

mod compile_error;
mod compiled;
mod conditional;
mod next;
mod node;
mod run_context;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::CompiledStateGraph;
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use next::Next;
pub use node::Node;
pub use run_context::RunContext;
pub use state_graph::{StateGraph, END, START};
