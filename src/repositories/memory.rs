use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{Answer, Attempt, TestDefinition};
use crate::db::types::AttemptStatus;
use crate::repositories::store::{
    AnswerWrite, AttemptStore, FinalizedAttempt, InsertOutcome, LiveAttempt, NewAttempt,
    StoreError, TotalsFn,
};

#[derive(Default)]
struct MemoryState {
    tests: HashMap<Uuid, TestDefinition>,
    attempts: HashMap<Uuid, Attempt>,
    answers: HashMap<(Uuid, Uuid), Answer>,
}

impl MemoryState {
    fn answers_for(&self, attempt_id: Uuid) -> Vec<Answer> {
        let mut answers: Vec<Answer> = self
            .answers
            .values()
            .filter(|answer| answer.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        answers
    }
}

/// Process-local store. One lock guards every map, so each operation is atomic.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Tests are authored elsewhere; this is how they enter the in-memory backend.
    pub(crate) async fn put_test(&self, definition: TestDefinition) {
        let mut state = self.state.write().await;
        state.tests.insert(definition.test.id, definition);
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn find_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, StoreError> {
        Ok(self.state.read().await.tests.get(&test_id).cloned())
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, StoreError> {
        Ok(self.state.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn find_in_progress(
        &self,
        user_id: Uuid,
        test_id: Uuid,
    ) -> Result<Option<Attempt>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .find(|attempt| {
                attempt.user_id == user_id
                    && attempt.test_id == test_id
                    && attempt.status == AttemptStatus::InProgress
            })
            .cloned())
    }

    async fn count_attempts(&self, user_id: Uuid, test_id: Uuid) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        let count = state
            .attempts
            .values()
            .filter(|attempt| attempt.user_id == user_id && attempt.test_id == test_id)
            .count();
        Ok(count as i64)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;

        let clashes = state.attempts.values().any(|existing| {
            existing.user_id == attempt.user_id
                && existing.test_id == attempt.test_id
                && (existing.attempt_number == attempt.attempt_number
                    || existing.status == AttemptStatus::InProgress)
        });
        if clashes || state.attempts.contains_key(&attempt.id) {
            return Ok(InsertOutcome::Conflict);
        }

        let row = Attempt {
            id: attempt.id,
            user_id: attempt.user_id,
            test_id: attempt.test_id,
            attempt_number: attempt.attempt_number,
            status: AttemptStatus::InProgress,
            started_at: attempt.started_at,
            completed_at: None,
            score: None,
            max_score: None,
            percent_score: None,
            time_spent: None,
            ip_address: attempt.ip_address,
            created_at: attempt.started_at,
            updated_at: attempt.started_at,
        };
        state.attempts.insert(row.id, row.clone());

        Ok(InsertOutcome::Created(row))
    }

    async fn upsert_answer(&self, answer: AnswerWrite) -> Result<Option<Answer>, StoreError> {
        let mut state = self.state.write().await;

        let in_progress = state
            .attempts
            .get(&answer.attempt_id)
            .is_some_and(|attempt| attempt.status == AttemptStatus::InProgress);
        if !in_progress {
            return Ok(None);
        }

        let key = (answer.attempt_id, answer.question_id);
        let stored = match state.answers.get_mut(&key) {
            Some(existing) => {
                existing.option_id = answer.option_id;
                existing.selected_option_ids = Json(answer.selected_option_ids);
                existing.text_answer = answer.text_answer;
                existing.is_correct = answer.is_correct;
                existing.points_earned = answer.points_earned;
                existing.updated_at = answer.now;
                existing.clone()
            }
            None => {
                let created = Answer {
                    id: Uuid::new_v4(),
                    attempt_id: answer.attempt_id,
                    question_id: answer.question_id,
                    option_id: answer.option_id,
                    selected_option_ids: Json(answer.selected_option_ids),
                    text_answer: answer.text_answer,
                    is_correct: answer.is_correct,
                    points_earned: answer.points_earned,
                    created_at: answer.now,
                    updated_at: answer.now,
                };
                state.answers.insert(key, created.clone());
                created
            }
        };

        Ok(Some(stored))
    }

    async fn list_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>, StoreError> {
        Ok(self.state.read().await.answers_for(attempt_id))
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        completed_at: PrimitiveDateTime,
        totals: TotalsFn<'_>,
    ) -> Result<Option<FinalizedAttempt>, StoreError> {
        let mut state = self.state.write().await;

        let Some(current) = state.attempts.get(&attempt_id).cloned() else {
            return Ok(None);
        };
        if current.status.is_terminal() {
            return Ok(None);
        }

        let answers = state.answers_for(attempt_id);
        let computed = totals(&current, &answers);

        let Some(attempt) = state.attempts.get_mut(&attempt_id) else {
            return Ok(None);
        };
        attempt.status = status;
        attempt.completed_at = Some(completed_at);
        attempt.score = Some(computed.score);
        attempt.max_score = Some(computed.max_score);
        attempt.percent_score = Some(computed.percent_score);
        attempt.time_spent = Some(computed.time_spent);
        attempt.updated_at = completed_at;

        Ok(Some(FinalizedAttempt { attempt: attempt.clone(), answers }))
    }

    async fn list_live_attempts(
        &self,
        test_id: Option<Uuid>,
    ) -> Result<Vec<LiveAttempt>, StoreError> {
        let state = self.state.read().await;

        let mut live = Vec::new();
        for attempt in state.attempts.values() {
            if attempt.status != AttemptStatus::InProgress {
                continue;
            }
            if test_id.is_some_and(|id| id != attempt.test_id) {
                continue;
            }
            let Some(definition) = state.tests.get(&attempt.test_id) else {
                return Err(StoreError::Inconsistent(format!(
                    "attempt {} references unknown test {}",
                    attempt.id, attempt.test_id
                )));
            };
            let answered =
                state.answers.keys().filter(|(attempt_id, _)| *attempt_id == attempt.id).count();

            live.push(LiveAttempt {
                attempt: attempt.clone(),
                test_title: definition.test.title.clone(),
                duration_minutes: definition.test.duration_minutes,
                total_questions: definition.questions.len() as i64,
                answered_questions: answered as i64,
            });
        }
        live.sort_by(|a, b| a.attempt.started_at.cmp(&b.attempt.started_at));

        Ok(live)
    }

    async fn list_overdue_attempts(
        &self,
        now: PrimitiveDateTime,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.read().await;

        let mut overdue: Vec<&Attempt> = state
            .attempts
            .values()
            .filter(|attempt| attempt.status == AttemptStatus::InProgress)
            .filter(|attempt| after.map_or(true, |cursor| attempt.id > cursor))
            .filter(|attempt| {
                state.tests.get(&attempt.test_id).is_some_and(|definition| {
                    attempt.started_at
                        + time::Duration::minutes(i64::from(definition.test.duration_minutes))
                        <= now
                })
            })
            .collect();
        overdue.sort_by_key(|attempt| attempt.id);

        Ok(overdue
            .into_iter()
            .take(limit.clamp(1, 1000) as usize)
            .map(|attempt| attempt.id)
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::store::FinalTotals;
    use crate::test_support::{fixed_time, single_choice_test};

    fn new_attempt(user_id: Uuid, test_id: Uuid, attempt_number: i32) -> NewAttempt {
        NewAttempt {
            id: Uuid::new_v4(),
            user_id,
            test_id,
            attempt_number,
            started_at: fixed_time(),
            ip_address: None,
        }
    }

    fn zero_totals(_: &Attempt, _: &[Answer]) -> FinalTotals {
        FinalTotals { score: 0.0, max_score: 0.0, percent_score: 0.0, time_spent: 0 }
    }

    #[tokio::test]
    async fn second_in_progress_insert_conflicts() {
        let store = MemoryStore::new();
        let definition = single_choice_test(30, 3, 1);
        let test_id = definition.test.id;
        store.put_test(definition).await;
        let user_id = Uuid::new_v4();

        let first = store.insert_attempt(new_attempt(user_id, test_id, 1)).await.unwrap();
        let second = store.insert_attempt(new_attempt(user_id, test_id, 2)).await.unwrap();

        assert!(matches!(first, InsertOutcome::Created(_)));
        assert!(matches!(second, InsertOutcome::Conflict));
        assert_eq!(store.count_attempts(user_id, test_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_attempt_number_conflicts_after_finalize() {
        let store = MemoryStore::new();
        let definition = single_choice_test(30, 3, 1);
        let test_id = definition.test.id;
        store.put_test(definition).await;
        let user_id = Uuid::new_v4();

        let InsertOutcome::Created(first) =
            store.insert_attempt(new_attempt(user_id, test_id, 1)).await.unwrap()
        else {
            panic!("expected created");
        };
        store
            .finalize_attempt(first.id, AttemptStatus::Completed, fixed_time(), &zero_totals)
            .await
            .unwrap()
            .expect("finalized");

        let again = store.insert_attempt(new_attempt(user_id, test_id, 1)).await.unwrap();
        assert!(matches!(again, InsertOutcome::Conflict));
    }

    #[tokio::test]
    async fn answers_are_rejected_after_finalize() {
        let store = MemoryStore::new();
        let definition = single_choice_test(30, 1, 1);
        let test_id = definition.test.id;
        let question_id = definition.questions[0].question.id;
        store.put_test(definition).await;

        let InsertOutcome::Created(attempt) =
            store.insert_attempt(new_attempt(Uuid::new_v4(), test_id, 1)).await.unwrap()
        else {
            panic!("expected created");
        };
        store
            .finalize_attempt(attempt.id, AttemptStatus::TimedOut, fixed_time(), &zero_totals)
            .await
            .unwrap();

        let write = AnswerWrite {
            attempt_id: attempt.id,
            question_id,
            option_id: None,
            selected_option_ids: Vec::new(),
            text_answer: Some("late".to_string()),
            is_correct: false,
            points_earned: 0.0,
            now: fixed_time(),
        };
        assert!(store.upsert_answer(write).await.unwrap().is_none());
        assert!(store.list_answers(attempt.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_finalize_loses() {
        let store = MemoryStore::new();
        let definition = single_choice_test(30, 1, 1);
        let test_id = definition.test.id;
        store.put_test(definition).await;

        let InsertOutcome::Created(attempt) =
            store.insert_attempt(new_attempt(Uuid::new_v4(), test_id, 1)).await.unwrap()
        else {
            panic!("expected created");
        };

        let first = store
            .finalize_attempt(attempt.id, AttemptStatus::Completed, fixed_time(), &zero_totals)
            .await
            .unwrap();
        let second = store
            .finalize_attempt(attempt.id, AttemptStatus::TimedOut, fixed_time(), &zero_totals)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let stored = store.find_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Completed);
    }

    #[tokio::test]
    async fn overdue_lists_only_expired_in_progress() {
        let store = MemoryStore::new();
        let definition = single_choice_test(30, 2, 1);
        let test_id = definition.test.id;
        store.put_test(definition).await;

        let InsertOutcome::Created(attempt) =
            store.insert_attempt(new_attempt(Uuid::new_v4(), test_id, 1)).await.unwrap()
        else {
            panic!("expected created");
        };

        let before = fixed_time() + time::Duration::minutes(29);
        let after = fixed_time() + time::Duration::minutes(30);

        assert!(store.list_overdue_attempts(before, None, 10).await.unwrap().is_empty());
        assert_eq!(store.list_overdue_attempts(after, None, 10).await.unwrap(), vec![attempt.id]);
        assert!(store.list_overdue_attempts(after, Some(attempt.id), 10).await.unwrap().is_empty());
    }
}
