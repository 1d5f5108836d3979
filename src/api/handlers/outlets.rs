//! Outlet API handlers
//!
//! Snapshot reads, manual refresh, toggle/cycle commands, telemetry history.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::Command;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/outlets - Current snapshot, no agent I/O
pub async fn list_outlets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.outlets.get())
}

/// POST /api/outlets/refresh - Re-fetch from the agent now
pub async fn refresh_outlets(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.outlets.refresh().await;
    Json(serde_json::json!({
        "refresh": outcome,
        "snapshot": state.outlets.get(),
    }))
}

/// POST /api/outlets/:id/toggle
pub async fn toggle_outlet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let command = state.dispatcher.toggle(&id).await?;
    Ok(command_response(&state, command))
}

/// POST /api/outlets/:id/cycle
pub async fn cycle_outlet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let command = state.dispatcher.cycle(&id).await?;
    Ok(command_response(&state, command))
}

fn command_response(state: &AppState, command: Command) -> Json<serde_json::Value> {
    let snapshot = state.outlets.get();
    Json(serde_json::json!({
        "command": command,
        "outlet": snapshot.outlet(&command.outlet_id),
    }))
}

/// GET /api/outlets/:id/history?limit=N
pub async fn outlet_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.history.fetch(&id, query.limit).await)
}

/// GET /api/commands - Recently resolved commands, newest first
pub async fn list_commands(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "commands": state.dispatcher.recent_commands(),
    }))
}
