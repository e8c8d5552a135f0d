use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::core::{config::Settings, security, state::AppState};
use crate::services::attempt_lifecycle::Principal;

pub(crate) struct CurrentUser(pub(crate) Principal);
pub(crate) struct CurrentAdmin(pub(crate) Principal);

/// Verifies a raw token and turns its claims into a principal.
pub(crate) fn principal_from_token(token: &str, settings: &Settings) -> Result<Principal, ApiError> {
    let claims = security::verify_token(token, settings)
        .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;
    let user_id = claims
        .user_id()
        .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;

    Ok(Principal { user_id, role: claims.role })
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        principal_from_token(token, state.settings()).map(CurrentUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(principal) = CurrentUser::from_request_parts(parts, state).await?;

        if principal.role.is_staff() {
            Ok(CurrentAdmin(principal))
        } else {
            Err(ApiError::Forbidden("Admin access required"))
        }
    }
}

/// Rejects a start that could only create a new attempt beyond the test's limit.
/// Holding an in-progress attempt passes, since starting again only claims it.
pub(crate) async fn ensure_attempt_capacity(
    state: &AppState,
    principal: &Principal,
    test_id: Uuid,
) -> Result<(), ApiError> {
    let store = state.attempts().store();

    let test = store
        .find_test(test_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load test"))?
        .ok_or_else(|| ApiError::NotFound("Test not found".to_string()))?;

    let in_progress = store
        .find_in_progress(principal.user_id, test_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load in-progress attempt"))?;
    if in_progress.is_some() {
        return Ok(());
    }

    let current = store
        .count_attempts(principal.user_id, test_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count attempts"))?;
    let max = i64::from(test.test.max_attempts);
    if current >= max {
        return Err(ApiError::AttemptLimit { current, max });
    }

    Ok(())
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(|value| value.chars().take(64).collect())
}
