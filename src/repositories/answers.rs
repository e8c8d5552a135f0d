use sqlx::types::Json;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::Answer;
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, attempt_id, question_id, option_id, selected_option_ids, text_answer, \
    is_correct, points_earned, created_at, updated_at";

pub(crate) struct UpsertAnswer<'a> {
    pub(crate) id: Uuid,
    pub(crate) attempt_id: Uuid,
    pub(crate) question_id: Uuid,
    pub(crate) option_id: Option<Uuid>,
    pub(crate) selected_option_ids: &'a [Uuid],
    pub(crate) text_answer: Option<&'a str>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) now: PrimitiveDateTime,
}

/// Last write wins per (attempt, question). The share lock on the attempt row makes a
/// concurrent finalize wait for this write, and no row is written once the attempt left
/// IN_PROGRESS.
pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    answer: UpsertAnswer<'_>,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "WITH live AS (
            SELECT id FROM attempts WHERE id = $2 AND status = $10 FOR SHARE
         )
         INSERT INTO answers (
            id, attempt_id, question_id, option_id, selected_option_ids, text_answer,
            is_correct, points_earned, created_at, updated_at
         )
         SELECT $1, live.id, $3, $4, $5, $6, $7, $8, $9, $9 FROM live
         ON CONFLICT (attempt_id, question_id) DO UPDATE SET
            option_id = EXCLUDED.option_id,
            selected_option_ids = EXCLUDED.selected_option_ids,
            text_answer = EXCLUDED.text_answer,
            is_correct = EXCLUDED.is_correct,
            points_earned = EXCLUDED.points_earned,
            updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(answer.id)
    .bind(answer.attempt_id)
    .bind(answer.question_id)
    .bind(answer.option_id)
    .bind(Json(answer.selected_option_ids.to_vec()))
    .bind(answer.text_answer)
    .bind(answer.is_correct)
    .bind(answer.points_earned)
    .bind(answer.now)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_attempt(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: Uuid,
) -> Result<Vec<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "SELECT {COLUMNS} FROM answers WHERE attempt_id = $1 ORDER BY created_at, id"
    ))
    .bind(attempt_id)
    .fetch_all(executor)
    .await
}
