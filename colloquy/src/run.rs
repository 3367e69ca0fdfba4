//! Engine entry point: `run_stream(request)` yields a lazy, finite,
//! non-restartable sequence of [`EngineEvent`]s; `run_sse` frames them as
//! `data: <json>\n\n`.
//!
//! Two logical channels — progress events and reporter content — serialize
//! into one ordered stream. Content chunks form a contiguous suffix within
//! the reporter stage; progress events flush before or after, never between
//! tokens. If the consumer drops the stream, the graph task is aborted and
//! no further events are produced.

use std::sync::Arc;

use serde_json::{json, Value};
use stream_event::{EngineEvent, EnvelopeState};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::llm::{client_for_model, ChatClient};
use crate::memory::{Checkpointer, MemorySaver, RunnableConfig};
use crate::retrieval::{HttpRetriever, Retriever, DEFAULT_K};
use crate::state::{WorkflowState, WorkflowStatus};
use crate::stream::StreamEvent;
use crate::workflow::{build_workflow, format_final_response};
use env_config::EngineEnv;

/// Processing mode for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Single-shot RAG answer, no debate.
    Daily,
    /// The multi-agent debate workflow.
    #[default]
    Rag,
}

/// One question for the engine.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub query: String,
    pub course_id: String,
    pub session_id: String,
    pub mode: Mode,
    /// Model for all agents unless overridden.
    pub base_model: Option<String>,
    /// Optional override for strategist + critic only.
    pub heavy_model: Option<String>,
    /// Embedding-model hint forwarded to the retriever.
    pub rag_model: Option<String>,
    pub course_prompt: Option<String>,
    /// Course-stored key for `custom-` models.
    pub course_api_key: Option<String>,
    pub max_rounds: Option<u32>,
    /// Prior user queries for tutor pattern analysis.
    pub conversation_history: Vec<String>,
}

impl EngineRequest {
    pub fn new(
        query: impl Into<String>,
        course_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            course_id: course_id.into(),
            session_id: session_id.into(),
            mode: Mode::default(),
            base_model: None,
            heavy_model: None,
            rag_model: None,
            course_prompt: None,
            course_api_key: None,
            max_rounds: None,
            conversation_history: Vec::new(),
        }
    }
}

/// The reasoning engine. Cheap to clone; all heavy members are shared.
#[derive(Clone)]
pub struct Engine {
    env: EngineEnv,
    retriever: Arc<dyn Retriever>,
    llm_override: Option<Arc<dyn ChatClient>>,
    checkpoints: Arc<MemorySaver<WorkflowState>>,
}

impl Engine {
    /// Builds the engine from environment configuration. Requires at least
    /// one provider key and the vector-store URL.
    pub fn from_env(env: EngineEnv) -> Result<Self, AgentError> {
        env.validate().map_err(|e| AgentError::Fatal(e.to_string()))?;
        let base_url = env
            .vector_store_url
            .clone()
            .ok_or_else(|| AgentError::Fatal("VECTOR_STORE_URL not configured".into()))?;
        let retriever = Arc::new(HttpRetriever::new(
            base_url,
            env.vector_store_api_key.clone(),
        ));
        Ok(Self {
            env,
            retriever,
            llm_override: None,
            checkpoints: Arc::new(MemorySaver::new()),
        })
    }

    /// Builds the engine with injected collaborators (tests, embedding).
    pub fn with_components(
        env: EngineEnv,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            env,
            retriever,
            llm_override: Some(llm),
            checkpoints: Arc::new(MemorySaver::new()),
        }
    }

    /// The session-keyed checkpoint store; consumers can query partial state
    /// for an in-flight session.
    pub fn checkpoints(&self) -> Arc<MemorySaver<WorkflowState>> {
        Arc::clone(&self.checkpoints)
    }

    fn base_client(&self, request: &EngineRequest) -> Result<Arc<dyn ChatClient>, AgentError> {
        if let Some(client) = &self.llm_override {
            return Ok(Arc::clone(client));
        }
        let model = request.base_model.as_deref().unwrap_or("gemini-1.5-flash");
        client_for_model(model, &self.env, request.course_api_key.as_deref())
    }

    fn heavy_client(
        &self,
        request: &EngineRequest,
    ) -> Result<Option<Arc<dyn ChatClient>>, AgentError> {
        if self.llm_override.is_some() {
            return Ok(None);
        }
        match &request.heavy_model {
            Some(model) => Ok(Some(client_for_model(
                model,
                &self.env,
                request.course_api_key.as_deref(),
            )?)),
            None => Ok(None),
        }
    }

    fn retriever_for(&self, request: &EngineRequest) -> Arc<dyn Retriever> {
        match (&request.rag_model, &self.env.vector_store_url) {
            (Some(model), Some(url)) if self.llm_override.is_none() => Arc::new(
                HttpRetriever::new(url.clone(), self.env.vector_store_api_key.clone())
                    .with_embedding_model(model.clone()),
            ),
            _ => Arc::clone(&self.retriever),
        }
    }

    /// Runs a request, yielding events until a terminal `complete` or `error`
    /// frame. Dropping the returned stream cancels outstanding work.
    pub fn run_stream(&self, request: EngineRequest) -> ReceiverStream<EngineEvent> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let engine = self.clone();
        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            let result = match request.mode {
                Mode::Daily => engine.run_daily(request, &out_tx).await,
                Mode::Rag => engine.run_rag(request, &out_tx).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "run failed");
                let _ = out_tx.send(EngineEvent::error(e.kind(), e.to_string())).await;
            }
            let _ = engine
                .checkpoints
                .remove(&RunnableConfig::for_session(session_id))
                .await;
        });
        ReceiverStream::new(out_rx)
    }

    /// [`run_stream`](Engine::run_stream) framed as SSE. Status frames carry
    /// the session envelope; content chunks stay bare.
    pub fn run_sse(&self, request: EngineRequest) -> impl Stream<Item = String> + Send {
        let mut envelope = EnvelopeState::new(request.session_id.clone());
        self.run_stream(request).map(move |event| match &event {
            EngineEvent::Content { .. } => stream_event::sse_frame(&event),
            EngineEvent::Status(_) => {
                let mut value = event.to_value().expect("event serialization is infallible");
                envelope.stamp(&mut value);
                format!("data: {value}\n\n")
            }
        })
    }

    async fn run_rag(
        &self,
        request: EngineRequest,
        out_tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<(), AgentError> {
        info!(
            query = %request.query,
            course_id = %request.course_id,
            session_id = %request.session_id,
            "starting multi-agent workflow"
        );

        let base = self.base_client(&request)?;
        let heavy = self.heavy_client(&request)?;
        let graph = build_workflow(
            self.retriever_for(&request),
            base,
            heavy,
            &self.env,
            Arc::clone(&self.checkpoints),
        )
        .map_err(|e| AgentError::Fatal(format!("workflow graph compile failed: {e}")))?;

        let max_rounds = request.max_rounds.unwrap_or(self.env.max_debate_rounds);
        let mut state = WorkflowState::new(
            request.query,
            request.course_id,
            request.session_id.clone(),
            max_rounds,
        );
        state.course_prompt = request.course_prompt;
        state.prior_queries = request.conversation_history;

        let config = RunnableConfig::for_session(&request.session_id);
        let (ev_tx, mut ev_rx) = mpsc::channel::<StreamEvent<WorkflowState>>(128);
        let graph_task = tokio::spawn(async move { graph.stream(state, config, ev_tx).await });

        while let Some(event) = ev_rx.recv().await {
            let out = match event {
                StreamEvent::Custom(value) => Some(progress_from_custom(value)),
                StreamEvent::Messages { chunk, .. } => Some(EngineEvent::content(chunk.content)),
                // The reporter's progress is its content; every other node
                // gets a completion tick.
                StreamEvent::TaskEnd {
                    node_id,
                    result: Ok(()),
                } if node_id != "reporter" => Some(EngineEvent::in_progress_with(
                    node_id.clone(),
                    format!("Processing: {node_id}"),
                    node_id,
                    None,
                )),
                _ => None,
            };
            if let Some(out) = out {
                if out_tx.send(out).await.is_err() {
                    // Consumer hung up: cancel the run and stop emitting.
                    graph_task.abort();
                    return Ok(());
                }
            }
        }

        let mut final_state = graph_task
            .await
            .map_err(|e| AgentError::Fatal(format!("workflow task failed: {e}")))??;
        final_state.workflow_status = WorkflowStatus::Complete;

        let response = format_final_response(&final_state, self.env.debug_logging);
        let _ = out_tx.send(EngineEvent::complete(response)).await;
        info!(
            rounds = final_state.current_round,
            decision = final_state.moderator_decision.as_str(),
            "workflow completed"
        );
        Ok(())
    }

    /// Daily mode: one retrieval plus one streamed completion, no debate.
    async fn run_daily(
        &self,
        request: EngineRequest,
        out_tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<(), AgentError> {
        let llm = self.base_client(&request)?;
        let _ = out_tx
            .send(EngineEvent::in_progress(
                "retrieve",
                "Performing contextual retrieval...",
            ))
            .await;

        let results = match self
            .retriever_for(&request)
            .search(&request.course_id, &request.query, DEFAULT_K)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "daily retrieval failed, answering without context");
                Vec::new()
            }
        };

        let context = if results.is_empty() {
            "No course material matched this question.".to_string()
        } else {
            results
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[Source {}]: {}", i + 1, r.content))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let guidance = request
            .course_prompt
            .as_deref()
            .unwrap_or("You are a helpful educational assistant.");
        let prompt = format!(
            "{guidance}\n\nUse the following course material to answer the question. \
             If the material does not cover it, say so.\n\nCOURSE MATERIAL:\n{context}\n\n\
             QUESTION:\n{query}",
            query = request.query
        );

        let (chunk_tx, mut chunk_rx) = mpsc::channel(128);
        let generate = llm.generate_stream(&prompt, None, chunk_tx);
        tokio::pin!(generate);

        let mut full = String::new();
        let mut done = false;
        let mut generate_result = None;
        while !done {
            tokio::select! {
                chunk = chunk_rx.recv() => match chunk {
                    Some(chunk) => {
                        full.push_str(&chunk.content);
                        if out_tx.send(EngineEvent::content(chunk.content)).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => done = true,
                },
                result = &mut generate, if generate_result.is_none() => {
                    generate_result = Some(result);
                }
            }
        }
        if let Some(Err(e)) = generate_result {
            return Err(e);
        }

        let response = json!({
            "success": true,
            "answer": {"content": full},
            "metadata": {
                "mode": "daily",
                "retrieval_count": results.len(),
            },
        });
        let _ = out_tx.send(EngineEvent::complete(response)).await;
        Ok(())
    }
}

/// Maps an agent's custom progress payload into a wire progress frame.
fn progress_from_custom(value: Value) -> EngineEvent {
    let stage = value
        .get("stage")
        .and_then(Value::as_str)
        .unwrap_or("processing")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Processing...")
        .to_string();
    match value.get("agent").and_then(Value::as_str) {
        Some(agent) => EngineEvent::in_progress_with(
            stage,
            message,
            agent.to_string(),
            value.get("details").cloned(),
        ),
        None => EngineEvent::in_progress(stage, message),
    }
}
