//! HTTP surface
//!
//! - `POST /query`: run one conversational query
//! - `GET /history/:user_id/:chat_id`: current history view
//! - `GET /health`

pub mod error;

use crate::history::{ConversationKey, Turn};
use crate::query::{QueryRequest, QueryResponse, QueryService};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use error::ApiResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub turns: Vec<Turn>,
}

pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(execute_query))
        .route("/history/:user_id/:chat_id", get(get_history))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn execute_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let response = state.service.execute(request).await?;
    Ok(Json(response))
}

async fn get_history(
    State(state): State<AppState>,
    Path((user_id, chat_id)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryResponse>> {
    let key = ConversationKey::new(user_id, chat_id);
    let turns = state.service.history().get_history(&key, params.limit).await?;
    Ok(Json(HistoryResponse { turns }))
}

async fn health_check() -> &'static str {
    "OK"
}
