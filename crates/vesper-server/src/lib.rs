//! HTTP front-end for the Vesper agent runtime.
//!
//! A deliberately thin adapter: `POST /api/chat` hands the request to the
//! agent loop and streams every typed event back as one JSON line;
//! `GET /healthz` answers liveness probes. Framing is this crate's concern
//! only - the core emits typed records.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use vesper_agent::tools::{register_builtin, register_subagents};
use vesper_agent::{Agent, AgentRequest, SubAgentDeps, ToolManager};
use vesper_llm::ModelManager;
use vesper_store::{FileStore, LtmStore, ReportStore, TodoStore};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    agent: Arc<Agent>,
}

/// Assemble the agent and its collaborators under one data directory.
///
/// Sub-agents are registered with empty specialised registries; embedders
/// with real search/browser/desktop tools pass their own.
pub fn build_agent(data_root: impl Into<PathBuf>, models: Arc<ModelManager>) -> Arc<Agent> {
    build_agent_with(
        data_root,
        models,
        ToolManager::new(),
        ToolManager::new(),
        ToolManager::new(),
    )
}

/// [`build_agent`] with explicit sub-agent tool registries.
pub fn build_agent_with(
    data_root: impl Into<PathBuf>,
    models: Arc<ModelManager>,
    search_tools: ToolManager,
    browser_tools: ToolManager,
    windows_tools: ToolManager,
) -> Arc<Agent> {
    let data_root = data_root.into();
    let todos = Arc::new(TodoStore::new(data_root.join("todos")));
    let reports = Arc::new(ReportStore::new(data_root.join("reports")));
    let files = Arc::new(FileStore::new(data_root.join("uploads")));
    let ltm = Arc::new(LtmStore::from_env());

    let mut tools = ToolManager::new();
    register_builtin(
        &mut tools,
        Arc::clone(&todos),
        Arc::clone(&reports),
        Arc::clone(&files),
    );
    register_subagents(
        &mut tools,
        SubAgentDeps {
            models: Arc::clone(&models),
            todos: Arc::clone(&todos),
            files: Arc::clone(&files),
            reports: Arc::clone(&reports),
        },
        search_tools,
        browser_tools,
        windows_tools,
    );

    Arc::new(Agent::new(
        models,
        Arc::new(tools),
        todos,
        files,
        ltm,
        data_root.join("conversations"),
    ))
}

/// Build the router around an assembled agent.
pub fn app(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/healthz", get(health))
        .layer(CorsLayer::permissive())
        .with_state(AppState { agent })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Stream the agent's event channel as JSON lines.
async fn chat(State(state): State<AppState>, Json(request): Json<AgentRequest>) -> Response {
    tracing::info!(
        session_id = request.session_id.as_deref().unwrap_or("(new)"),
        input_len = request.user_input.len(),
        "chat request"
    );

    let mut rx = state.agent.run(request);
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    yield Ok::<_, std::convert::Infallible>(format!("{line}\n"));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialise event");
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
