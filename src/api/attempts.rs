use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{client_ip, ensure_attempt_capacity, CurrentUser};
use crate::core::state::AppState;
use crate::services::attempt_lifecycle::CompletionTrigger;
use crate::schemas::attempt::{
    AnswerResponse, AttemptDetailResponse, AttemptResponse, CompleteRequest, CompletionResponse,
    RemainingTimeResponse, SubmitAnswerRequest,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/tests/:test_id/attempts", post(start_attempt))
        .route("/attempts/:attempt_id", get(get_attempt))
        .route("/attempts/:attempt_id/answers", post(submit_answer))
        .route("/attempts/:attempt_id/remaining-time", get(remaining_time))
        .route("/attempts/:attempt_id/complete", post(complete_attempt))
}

async fn start_attempt(
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    ensure_attempt_capacity(&state, &principal, test_id).await?;

    let outcome = state.attempts().start(principal, test_id, client_ip(&headers)).await?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((status, Json(outcome.attempt.into())))
}

async fn get_attempt(
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<AttemptDetailResponse>, ApiError> {
    let details = state.attempts().get_attempt(principal, attempt_id).await?;
    let reveal_grading = principal.role.is_staff() || details.attempt.status.is_terminal();

    Ok(Json(AttemptDetailResponse::from_details(details, reveal_grading)))
}

async fn submit_answer(
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let answer =
        state.attempts().submit_answer(principal, attempt_id, payload.into_command()).await?;

    // The submitter sees how the answer was graded; the detail view stays redacted.
    Ok(Json(AnswerResponse::from_answer(answer, true)))
}

async fn remaining_time(
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<RemainingTimeResponse>, ApiError> {
    let remaining = state.attempts().remaining_time(principal, attempt_id).await?;
    Ok(Json(remaining.into()))
}

async fn complete_attempt(
    CurrentUser(principal): CurrentUser,
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let trigger = match payload {
        Ok(Json(request)) => request.trigger.map(CompletionTrigger::from),
        // No body at all means the student pressed finish.
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    }
    .unwrap_or(CompletionTrigger::User);

    let outcome = state.attempts().complete(principal, attempt_id, trigger).await?;
    Ok(Json(outcome.into()))
}
