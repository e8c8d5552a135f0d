use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{Answer, Attempt, TestDefinition};
use crate::db::types::AttemptStatus;
use crate::repositories::store::{
    AnswerWrite, AttemptStore, FinalizedAttempt, InsertOutcome, LiveAttempt, NewAttempt,
    StoreError, TotalsFn,
};
use crate::repositories::{answers, attempts, catalog};

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, StoreError> {
        Ok(catalog::load_definition(&self.pool, test_id).await?)
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_by_id(&self.pool, attempt_id).await?)
    }

    async fn find_in_progress(
        &self,
        user_id: Uuid,
        test_id: Uuid,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_in_progress(&self.pool, user_id, test_id).await?)
    }

    async fn count_attempts(&self, user_id: Uuid, test_id: Uuid) -> Result<i64, StoreError> {
        Ok(attempts::count_by_user_and_test(&self.pool, user_id, test_id).await?)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<InsertOutcome, StoreError> {
        let created = attempts::create(
            &self.pool,
            attempts::CreateAttempt {
                id: attempt.id,
                user_id: attempt.user_id,
                test_id: attempt.test_id,
                attempt_number: attempt.attempt_number,
                started_at: attempt.started_at,
                ip_address: attempt.ip_address.as_deref(),
            },
        )
        .await?;

        Ok(match created {
            Some(row) => InsertOutcome::Created(row),
            None => InsertOutcome::Conflict,
        })
    }

    async fn upsert_answer(&self, answer: AnswerWrite) -> Result<Option<Answer>, StoreError> {
        let stored = answers::upsert(
            &self.pool,
            answers::UpsertAnswer {
                id: Uuid::new_v4(),
                attempt_id: answer.attempt_id,
                question_id: answer.question_id,
                option_id: answer.option_id,
                selected_option_ids: &answer.selected_option_ids,
                text_answer: answer.text_answer.as_deref(),
                is_correct: answer.is_correct,
                points_earned: answer.points_earned,
                now: answer.now,
            },
        )
        .await?;

        Ok(stored)
    }

    async fn list_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>, StoreError> {
        Ok(answers::list_by_attempt(&self.pool, attempt_id).await?)
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        completed_at: PrimitiveDateTime,
        totals: TotalsFn<'_>,
    ) -> Result<Option<FinalizedAttempt>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(locked) = attempts::lock_by_id(&mut *tx, attempt_id).await? else {
            return Ok(None);
        };
        if locked.status.is_terminal() {
            return Ok(None);
        }

        let stored_answers = answers::list_by_attempt(&mut *tx, attempt_id).await?;
        let computed = totals(&locked, &stored_answers);

        let updated = attempts::finalize(
            &mut *tx,
            attempts::FinalizeAttempt {
                id: attempt_id,
                status,
                completed_at,
                score: computed.score,
                max_score: computed.max_score,
                percent_score: computed.percent_score,
                time_spent: computed.time_spent,
            },
        )
        .await?;

        let Some(attempt) = updated else {
            return Err(StoreError::Inconsistent(format!(
                "attempt {attempt_id} left IN_PROGRESS while row-locked"
            )));
        };

        tx.commit().await?;

        Ok(Some(FinalizedAttempt { attempt, answers: stored_answers }))
    }

    async fn list_live_attempts(
        &self,
        test_id: Option<Uuid>,
    ) -> Result<Vec<LiveAttempt>, StoreError> {
        let rows = attempts::list_live(&self.pool, test_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| LiveAttempt {
                attempt: row.attempt,
                test_title: row.test_title,
                duration_minutes: row.duration_minutes,
                total_questions: row.total_questions,
                answered_questions: row.answered_questions,
            })
            .collect())
    }

    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(attempts::list_overdue_ids(&self.pool, now, after, limit).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
