use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentAdmin;
use crate::core::state::AppState;
use crate::schemas::attempt::LiveAttemptResponse;
use crate::services::realtime::feed::ActivitySnapshot;

#[derive(Debug, Deserialize)]
pub(crate) struct LiveAttemptsQuery {
    #[serde(default, alias = "testId")]
    test_id: Option<Uuid>,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/live-attempts", get(live_attempts))
        .route("/activity", get(activity))
}

async fn live_attempts(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
    Query(params): Query<LiveAttemptsQuery>,
) -> Result<Json<Vec<LiveAttemptResponse>>, ApiError> {
    let live = state.attempts().live_attempts(params.test_id).await?;
    Ok(Json(live.into_iter().map(LiveAttemptResponse::from).collect()))
}

async fn activity(
    CurrentAdmin(_admin): CurrentAdmin,
    State(state): State<AppState>,
) -> Json<ActivitySnapshot> {
    Json(state.feed().snapshot().await)
}
