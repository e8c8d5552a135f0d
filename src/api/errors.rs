use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::attempt_lifecycle::AttemptError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug, Serialize)]
struct AttemptLimitResponse {
    status: u16,
    detail: String,
    current_attempts: i64,
    max_attempts: i64,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(String),
    AttemptLimit { current: i64, max: i64 },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<AttemptError> for ApiError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            AttemptError::NotAvailable(reason) => ApiError::BadRequest(reason.to_string()),
            AttemptError::MaxAttemptsReached { current, max } => {
                ApiError::AttemptLimit { current, max }
            }
            AttemptError::AccessDenied => ApiError::Forbidden("Access denied"),
            AttemptError::AttemptNotActive => {
                ApiError::BadRequest("Attempt is not in progress".to_string())
            }
            AttemptError::AlreadyCompleted => {
                ApiError::BadRequest("Attempt is already completed".to_string())
            }
            AttemptError::InvalidAnswer(reason) => ApiError::BadRequest(reason),
            AttemptError::TimeRemaining { remaining } => ApiError::BadRequest(format!(
                "Time has not expired yet: {remaining} seconds remaining"
            )),
            AttemptError::Storage(err) => ApiError::internal(err, "Attempt storage failure"),
        }
    }
}

fn error_body(status: StatusCode, detail: String) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                let mut response = error_body(StatusCode::UNAUTHORIZED, message.to_string());
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            ApiError::Forbidden(message) => error_body(StatusCode::FORBIDDEN, message.to_string()),
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => error_body(StatusCode::NOT_FOUND, message),
            ApiError::AttemptLimit { current, max } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                (
                    status,
                    Json(AttemptLimitResponse {
                        status: status.as_u16(),
                        detail: "Maximum number of attempts reached".to_string(),
                        current_attempts: current,
                        max_attempts: max,
                    }),
                )
                    .into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::StoreError;
    use crate::test_support::read_json;

    #[tokio::test]
    async fn attempt_limit_reports_counts() {
        let response =
            ApiError::from(AttemptError::MaxAttemptsReached { current: 2, max: 2 }).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let json = read_json(response).await;
        assert_eq!(json["current_attempts"], 2);
        assert_eq!(json["max_attempts"], 2);
    }

    #[tokio::test]
    async fn storage_errors_hide_details() {
        let err = AttemptError::Storage(StoreError::Inconsistent("secret row".to_string()));
        let response = ApiError::from(err).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = read_json(response).await;
        assert_eq!(json["detail"], "Attempt storage failure");
    }

    #[test]
    fn lifecycle_errors_map_to_statuses() {
        let cases = [
            (AttemptError::NotFound("Attempt"), StatusCode::NOT_FOUND),
            (AttemptError::NotAvailable("Test is not published"), StatusCode::BAD_REQUEST),
            (AttemptError::AccessDenied, StatusCode::FORBIDDEN),
            (AttemptError::AttemptNotActive, StatusCode::BAD_REQUEST),
            (AttemptError::AlreadyCompleted, StatusCode::BAD_REQUEST),
            (AttemptError::InvalidAnswer("bad".to_string()), StatusCode::BAD_REQUEST),
            (AttemptError::TimeRemaining { remaining: 10 }, StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
