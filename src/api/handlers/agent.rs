use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::api::middleware::AppError;
use crate::models::{AgentRunRequest, DatabaseRunResult};
use crate::services::AgentService;

/// Application state shared by handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: AgentService,
}

/// Generate and execute a query plan against every requested database.
///
/// Only a malformed request fails the call; per-database failures are
/// reported inside the returned records.
pub async fn run_agent(
    State(state): State<AppState>,
    payload: Result<Json<AgentRunRequest>, JsonRejection>,
) -> Result<Json<Vec<DatabaseRunResult>>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate().map_err(AppError::Validation)?;

    tracing::info!(
        "Running agent for {} database(s), prompt length {}",
        request.databases.len(),
        request.prompt.len()
    );

    Ok(Json(state.agent.run(&request).await))
}
