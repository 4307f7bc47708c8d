// SPDX-License-Identifier: MIT

//! HTTP API

mod error;

pub use error::{ApiError, ApiResult, ErrorResponse};

use crate::adk::error::NowWhatError;
use crate::adk::tool::Tool;
use crate::nowwhat::agent::{message_json, ReactAgent};
use crate::nowwhat::geocode::Coordinates;
use crate::nowwhat::workflow::graph::RunOutcome;
use crate::nowwhat::workflow::refine::{SearchPipeline, SearchState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const SERVICE_NAME: &str = "now_what_be";
const MISSING_KEY_MESSAGE: &str = "API 키가 설정되지 않았습니다.";

/// Pipelines shared by all requests. `None` when the model is not
/// configured.
pub struct AppState {
    pub pipeline: Option<SearchPipeline>,
    pub agent: Option<ReactAgent>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

impl SearchRequest {
    fn validated_query(&self) -> ApiResult<&str> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation(
                "query는 비어 있을 수 없습니다.".to_string(),
            ));
        }
        Ok(query)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .route("/api/v1/orchestration/search", post(orchestration_search))
        .route("/api/v1/agent/search", post(agent_search))
        .route("/api/v1/agent/tools", get(agent_tools))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), NowWhatError> {
    let app = router(Arc::new(state));
    let addr = format!("{}:{}", host, port);
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to Now What Backend API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
    }))
}

pub async fn orchestration_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.validated_query()?;
    let pipeline = state
        .pipeline
        .as_ref()
        .ok_or_else(|| ApiError::ApiKey(MISSING_KEY_MESSAGE.to_string()))?;

    let outcome = pipeline
        .run(query, request.location)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(orchestration_body(query, &outcome)))
}

fn orchestration_body(query: &str, outcome: &RunOutcome<SearchState>) -> Value {
    let state = &outcome.state;
    let total = state.usage.total();
    json!({
        "success": true,
        "query": query,
        "result_dict": state.result,
        "queries": state.queries(),
        "steps": state.steps,
        "status": outcome.status,
        "token_usage": {
            "total_input_tokens": total.input_tokens,
            "total_output_tokens": total.output_tokens,
            "total_tokens": total.total_tokens,
            "total_cost_krw": total.cost,
            "total_cost_formatted": total.cost_formatted,
            "node_breakdown": state.usage.records(),
        },
        "reverse_geocode_result": state.location,
    })
}

/// Tools registered with the agent
pub async fn agent_tools(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let agent = state
        .agent
        .as_ref()
        .ok_or_else(|| ApiError::ApiKey(MISSING_KEY_MESSAGE.to_string()))?;

    let tools: Vec<Value> = agent
        .tools()
        .list()
        .await
        .iter()
        .map(|t| json!({"name": t.name(), "description": t.description(), "parameters": t.schema()}))
        .collect();
    Ok(Json(json!({"success": true, "tools": tools})))
}

pub async fn agent_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    let query = request.validated_query()?;
    let agent = state
        .agent
        .as_ref()
        .ok_or_else(|| ApiError::ApiKey(MISSING_KEY_MESSAGE.to_string()))?;

    let outcome = agent
        .run_query(query, request.location)
        .await
        .map_err(|e| ApiError::Agent(e.to_string()))?;
    let run = &outcome.state;

    Ok(Json(json!({
        "success": true,
        "query": query,
        "elapsed_time": format!("{:.1}초", run.elapsed().as_secs_f64()),
        "tool_call_count": run.tool_call_count,
        "messages": run.messages.iter().map(message_json).collect::<Vec<_>>(),
        "final_result": run.final_result,
        "done": run.done,
        "status": outcome.status,
        "token_usage": run.usage.total(),
    })))
}
