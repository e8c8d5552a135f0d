use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{Attempt, LiveAttemptRow};
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, user_id, test_id, attempt_number, status, started_at, completed_at, \
    score, max_score, percent_score, time_spent, ip_address, created_at, updated_at";

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) ip_address: Option<&'a str>,
}

pub(crate) struct FinalizeAttempt {
    pub(crate) id: Uuid,
    pub(crate) status: AttemptStatus,
    pub(crate) completed_at: PrimitiveDateTime,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percent_score: f64,
    pub(crate) time_spent: i32,
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Row-locks the attempt for the rest of the surrounding transaction.
pub(crate) async fn lock_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    user_id: Uuid,
    test_id: Uuid,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts \
         WHERE user_id = $1 AND test_id = $2 AND status = $3"
    ))
    .bind(user_id)
    .bind(test_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_by_user_and_test(
    executor: impl sqlx::PgExecutor<'_>,
    user_id: Uuid,
    test_id: Uuid,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE user_id = $1 AND test_id = $2")
        .bind(user_id)
        .bind(test_id)
        .fetch_one(executor)
        .await
}

/// Returns `None` when either uniqueness rule rejected the row.
pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    attempt: CreateAttempt<'_>,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (
            id, user_id, test_id, attempt_number, status, started_at,
            ip_address, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$6,$6)
        ON CONFLICT DO NOTHING
        RETURNING {COLUMNS}"
    ))
    .bind(attempt.id)
    .bind(attempt.user_id)
    .bind(attempt.test_id)
    .bind(attempt.attempt_number)
    .bind(AttemptStatus::InProgress)
    .bind(attempt.started_at)
    .bind(attempt.ip_address)
    .fetch_optional(executor)
    .await
}

/// Applies the terminal write only while the attempt is still in progress.
pub(crate) async fn finalize(
    executor: impl sqlx::PgExecutor<'_>,
    params: FinalizeAttempt,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts SET
            status = $2,
            completed_at = $3,
            score = $4,
            max_score = $5,
            percent_score = $6,
            time_spent = $7,
            updated_at = $3
         WHERE id = $1 AND status = $8
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.status)
    .bind(params.completed_at)
    .bind(params.score)
    .bind(params.max_score)
    .bind(params.percent_score)
    .bind(params.time_spent)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_live(
    pool: &PgPool,
    test_id: Option<Uuid>,
) -> Result<Vec<LiveAttemptRow>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT a.id, a.user_id, a.test_id, a.attempt_number, a.status, a.started_at, \
         a.completed_at, a.score, a.max_score, a.percent_score, a.time_spent, a.ip_address, \
         a.created_at, a.updated_at, \
         t.title AS test_title, t.duration_minutes, \
         (SELECT COUNT(*) FROM questions q WHERE q.test_id = a.test_id) AS total_questions, \
         (SELECT COUNT(*) FROM answers ans WHERE ans.attempt_id = a.id) AS answered_questions \
         FROM attempts a JOIN tests t ON t.id = a.test_id WHERE a.status = ",
    );
    builder.push_bind(AttemptStatus::InProgress);

    if let Some(test_id) = test_id {
        builder.push(" AND a.test_id = ");
        builder.push_bind(test_id);
    }

    builder.push(" ORDER BY a.started_at ASC");

    builder.build_query_as::<LiveAttemptRow>().fetch_all(pool).await
}

/// Ids of in-progress attempts whose allotted duration has fully elapsed at `now`.
pub(crate) async fn list_overdue_ids(
    pool: &PgPool,
    now: PrimitiveDateTime,
    after: Option<Uuid>,
    limit: i64,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT a.id FROM attempts a JOIN tests t ON t.id = a.test_id \
         WHERE a.status = $1 \
           AND a.started_at + make_interval(mins => t.duration_minutes) <= $2 \
           AND ($3::uuid IS NULL OR a.id > $3) \
         ORDER BY a.id ASC \
         LIMIT $4",
    )
    .bind(AttemptStatus::InProgress)
    .bind(now)
    .bind(after)
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}
