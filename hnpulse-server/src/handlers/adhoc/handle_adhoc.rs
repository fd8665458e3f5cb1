use axum::{
    extract::{Query, State, rejection::JsonRejection},
    response::Json,
};
use hnpulse_core::{
    AdmissionError, ItemId, JobRequest, RefreshScope,
    api::types::{
        ActionResponse, AdhocStatusQuery, AdhocStatusResponse,
        SummarizeSingleRequest,
    },
};
use tracing::info;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub async fn summarize_single_handler(
    State(state): State<AppState>,
    payload: Result<Json<SummarizeSingleRequest>, JsonRejection>,
) -> AppResult<Json<ActionResponse>> {
    let Json(request) =
        payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let item_id = ItemId::parse(&request.item_id)?;
    let url = request
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    let request = JobRequest::adhoc(item_id.clone(), url);
    let ticket = state
        .run_blocking(move |state| state.runner.trigger(request))
        .await??;
    // Quota as seen at grant time, before this run counts.
    let remaining = ticket
        .adhoc_quota
        .map_or(0, |quota| quota.remaining.saturating_sub(1));
    info!(
        run_id = %ticket.run_id,
        item_id = %item_id,
        remaining_today = remaining,
        "ad-hoc summary accepted"
    );

    Ok(Json(
        ActionResponse::started(
            format!("Summarizing article {item_id}"),
            ticket.run_id.to_string(),
        )
        .with_remaining_today(remaining),
    ))
}

pub async fn adhoc_status_handler(
    State(state): State<AppState>,
    Query(query): Query<AdhocStatusQuery>,
) -> AppResult<Json<AdhocStatusResponse>> {
    let item = match query.item_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(ItemId::parse(raw)?),
        _ => None,
    };

    let (quota, admission) = state
        .run_blocking(move |state| {
            let guard = &state.guard;
            let quota = guard.adhoc_quota();
            let admission = match item {
                Some(item) => guard.check(&RefreshScope::Item(item)),
                None if quota.remaining == 0 => {
                    Err(AdmissionError::DailyQuotaExceeded {
                        limit: quota.limit,
                    })
                }
                None if guard.is_in_progress() => {
                    Err(AdmissionError::AlreadyInProgress)
                }
                None => Ok(()),
            };
            (quota, admission)
        })
        .await?;

    Ok(Json(AdhocStatusResponse {
        can_refresh: admission.is_ok(),
        remaining_today: quota.remaining,
        daily_limit: quota.limit,
        error_message: admission.err().map(|reason| reason.to_string()),
    }))
}
