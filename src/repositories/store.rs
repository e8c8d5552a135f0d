use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{Answer, Attempt, TestDefinition};
use crate::db::types::AttemptStatus;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("inconsistent stored state: {0}")]
    Inconsistent(String),
}

pub(crate) struct NewAttempt {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) ip_address: Option<String>,
}

#[derive(Debug)]
pub(crate) enum InsertOutcome {
    Created(Attempt),
    /// A row for the same (user, test) slot already exists.
    Conflict,
}

pub(crate) struct AnswerWrite {
    pub(crate) attempt_id: Uuid,
    pub(crate) question_id: Uuid,
    pub(crate) option_id: Option<Uuid>,
    pub(crate) selected_option_ids: Vec<Uuid>,
    pub(crate) text_answer: Option<String>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) now: PrimitiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FinalTotals {
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percent_score: f64,
    pub(crate) time_spent: i32,
}

/// Computes the terminal totals from the locked attempt and its stored answers.
pub(crate) type TotalsFn<'a> = &'a (dyn Fn(&Attempt, &[Answer]) -> FinalTotals + Send + Sync);

#[derive(Debug)]
pub(crate) struct FinalizedAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) answers: Vec<Answer>,
}

#[derive(Debug, Clone)]
pub(crate) struct LiveAttempt {
    pub(crate) attempt: Attempt,
    pub(crate) test_title: String,
    pub(crate) duration_minutes: i32,
    pub(crate) total_questions: i64,
    pub(crate) answered_questions: i64,
}

/// Durable record of tests, attempts and answers.
///
/// Adapters must guarantee:
/// - at most one attempt per (user, test, attempt number) and at most one in-progress
///   attempt per (user, test); `insert_attempt` reports a violation as `Conflict`;
/// - at most one answer per (attempt, question), written only while the attempt is in
///   progress;
/// - `finalize_attempt` reads answers and writes the terminal state atomically with
///   respect to answer writes, and only from `IN_PROGRESS`.
#[async_trait]
pub(crate) trait AttemptStore: Send + Sync {
    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, StoreError>;

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, StoreError>;

    async fn find_in_progress(
        &self,
        user_id: Uuid,
        test_id: Uuid,
    ) -> Result<Option<Attempt>, StoreError>;

    async fn count_attempts(&self, user_id: Uuid, test_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<InsertOutcome, StoreError>;

    /// `None` when the attempt is missing or no longer in progress.
    async fn upsert_answer(&self, answer: AnswerWrite) -> Result<Option<Answer>, StoreError>;

    async fn list_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>, StoreError>;

    /// `None` when the attempt is missing or another writer already finalized it.
    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        completed_at: PrimitiveDateTime,
        totals: TotalsFn<'_>,
    ) -> Result<Option<FinalizedAttempt>, StoreError>;

    async fn list_live_attempts(
        &self,
        test_id: Option<Uuid>,
    ) -> Result<Vec<LiveAttempt>, StoreError>;

    /// Overdue in-progress attempt ids in id order, strictly after `after` when given.
    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}
