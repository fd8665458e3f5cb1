use axum::{extract::State, response::Json};
use hnpulse_core::{
    AdmissionError, JobRequest, RefreshScope,
    api::types::{ActionResponse, StatusResponse},
};
use tracing::debug;

use crate::infra::{app_state::AppState, errors::AppResult};

pub async fn refresh_status_handler(
    State(state): State<AppState>,
) -> AppResult<Json<StatusResponse>> {
    let status = state.run_blocking(status_snapshot).await?;
    Ok(Json(status))
}

fn status_snapshot(state: &AppState) -> StatusResponse {
    let guard = &state.guard;
    let admission = guard.check(&RefreshScope::Daily);

    // Busy is reported through `in_progress`, not as a rate limit.
    let rate_limit_message = match &admission {
        Ok(()) | Err(AdmissionError::AlreadyInProgress) => None,
        Err(reason) => Some(reason.to_string()),
    };

    StatusResponse {
        in_progress: guard.is_in_progress(),
        last_refresh: guard.last_completion(&RefreshScope::Daily),
        can_refresh: admission.is_ok(),
        rate_limit_message,
    }
}

pub async fn trigger_refresh_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ActionResponse>> {
    let ticket = state
        .run_blocking(|state| state.runner.trigger(JobRequest::manual()))
        .await??;
    debug!(run_id = %ticket.run_id, "manual refresh accepted");
    Ok(Json(ActionResponse::started(
        "Refresh started",
        ticket.run_id.to_string(),
    )))
}
