use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::metrics;
use crate::core::time::Clock;
use crate::db::models::{Answer, Attempt, TestDefinition};
use crate::db::types::{AttemptStatus, UserRole};
use crate::repositories::store::{
    AnswerWrite, FinalTotals, FinalizedAttempt, InsertOutcome, LiveAttempt, NewAttempt,
};
use crate::repositories::{AttemptStore, StoreError};
use crate::services::attempt_timing;
use crate::services::realtime::{events, Broadcaster, RealtimeEvent};
use crate::services::scoring::{self, AttemptSummary, ScoringPolicy, SubmittedAnswer};

/// Uniqueness conflicts that are neither a claim nor a full slot are retried this often.
const START_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    NotAvailable(&'static str),
    #[error("maximum attempts reached ({current}/{max})")]
    MaxAttemptsReached { current: i64, max: i64 },
    #[error("access denied")]
    AccessDenied,
    #[error("attempt is not in progress")]
    AttemptNotActive,
    #[error("attempt is already completed")]
    AlreadyCompleted,
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),
    #[error("{remaining} seconds remain on this attempt")]
    TimeRemaining { remaining: i64 },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Authenticated caller as asserted by the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Principal {
    pub(crate) user_id: Uuid,
    pub(crate) role: UserRole,
}

impl Principal {
    fn can_read(&self, attempt: &Attempt) -> bool {
        attempt.user_id == self.user_id || self.role.is_staff()
    }
}

/// Why an attempt was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CompletionTrigger {
    User,
    TabSwitch,
    Timer,
    /// Server-side expiry: the sweep loop or a lazy check on read.
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LifecyclePolicy {
    pub(crate) scoring: ScoringPolicy,
    pub(crate) timer_skew_tolerance_seconds: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct StartOutcome {
    pub(crate) attempt: Attempt,
    /// `false` when an existing in-progress attempt was claimed.
    pub(crate) created: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct AnswerCommand {
    pub(crate) question_id: Uuid,
    pub(crate) answer: SubmittedAnswer,
}

#[derive(Debug, Clone)]
pub(crate) struct CompletionOutcome {
    pub(crate) attempt: Attempt,
    pub(crate) summary: AttemptSummary,
}

#[derive(Debug, Clone)]
pub(crate) struct AttemptDetails {
    pub(crate) attempt: Attempt,
    pub(crate) test: TestDefinition,
    pub(crate) answers: Vec<Answer>,
    pub(crate) remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RemainingTime {
    pub(crate) remaining_seconds: i64,
    pub(crate) status: AttemptStatus,
}

#[derive(Debug, Clone)]
pub(crate) struct LiveAttemptView {
    pub(crate) live: LiveAttempt,
    pub(crate) remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExpiryPage {
    pub(crate) closed: usize,
    pub(crate) failed: usize,
    /// Cursor for the next page; `None` once the overdue set is exhausted.
    pub(crate) next_after: Option<Uuid>,
}

/// Drives an attempt through IN_PROGRESS to COMPLETED or TIMED_OUT.
#[derive(Clone)]
pub(crate) struct AttemptService {
    store: Arc<dyn AttemptStore>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
}

impl AttemptService {
    pub(crate) fn new(
        store: Arc<dyn AttemptStore>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self { store, broadcaster, clock, policy }
    }

    pub(crate) fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    async fn load_test(&self, test_id: Uuid) -> Result<TestDefinition, AttemptError> {
        self.store.find_test(test_id).await?.ok_or(AttemptError::NotFound("Test"))
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt, AttemptError> {
        self.store.find_attempt(attempt_id).await?.ok_or(AttemptError::NotFound("Attempt"))
    }

    async fn emit(&self, event: RealtimeEvent) {
        let scope = event.topic.scope();
        let kind = event.event;
        match self.broadcaster.publish(event).await {
            Ok(()) => metrics::realtime_published(scope),
            Err(err) => {
                metrics::realtime_failed();
                tracing::warn!(error = %err, event = ?kind, scope, "Realtime publish failed");
            }
        }
    }

    /// Creates a new attempt or hands back the caller's in-progress one.
    pub(crate) async fn start(
        &self,
        principal: Principal,
        test_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<StartOutcome, AttemptError> {
        let definition = self.load_test(test_id).await?;
        let test = &definition.test;

        if let Some(reason) = attempt_timing::availability_error(test, self.clock.now()) {
            return Err(AttemptError::NotAvailable(reason));
        }

        for _ in 0..START_RETRIES {
            if let Some(existing) = self.store.find_in_progress(principal.user_id, test_id).await? {
                let remaining = attempt_timing::remaining_seconds(
                    existing.started_at,
                    test.duration_minutes,
                    self.clock.now(),
                );
                if remaining > 0 {
                    tracing::info!(
                        attempt_id = %existing.id,
                        user_id = %principal.user_id,
                        test_id = %test_id,
                        "Claimed in-progress attempt"
                    );
                    metrics::attempt_started(true);
                    return Ok(StartOutcome { attempt: existing, created: false });
                }
                self.finalize(existing.id, AttemptStatus::TimedOut, CompletionTrigger::Expired)
                    .await?;
            }

            let current = self.store.count_attempts(principal.user_id, test_id).await?;
            let max = i64::from(test.max_attempts);
            if current >= max {
                return Err(AttemptError::MaxAttemptsReached { current, max });
            }

            let attempt_number = i32::try_from(current + 1).map_err(|_| {
                StoreError::Inconsistent(format!("attempt counter overflow for test {test_id}"))
            })?;
            let outcome = self
                .store
                .insert_attempt(NewAttempt {
                    id: Uuid::new_v4(),
                    user_id: principal.user_id,
                    test_id,
                    attempt_number,
                    started_at: self.clock.now(),
                    ip_address: ip_address.clone(),
                })
                .await?;

            match outcome {
                InsertOutcome::Created(attempt) => {
                    tracing::info!(
                        attempt_id = %attempt.id,
                        user_id = %attempt.user_id,
                        test_id = %attempt.test_id,
                        attempt_number = attempt.attempt_number,
                        "Attempt started"
                    );
                    metrics::attempt_started(false);
                    self.emit(events::attempt_started(&attempt, test.duration_minutes)).await;
                    self.emit(events::student_started_exam(
                        &attempt,
                        &test.title,
                        test.duration_minutes,
                        definition.questions.len(),
                    ))
                    .await;
                    return Ok(StartOutcome { attempt, created: true });
                }
                InsertOutcome::Conflict => {
                    tracing::debug!(
                        user_id = %principal.user_id,
                        test_id = %test_id,
                        "Concurrent attempt insert detected; re-reading"
                    );
                }
            }
        }

        Err(StoreError::Inconsistent(format!(
            "could not settle attempt start for user {} on test {test_id}",
            principal.user_id
        ))
        .into())
    }

    pub(crate) async fn submit_answer(
        &self,
        principal: Principal,
        attempt_id: Uuid,
        command: AnswerCommand,
    ) -> Result<Answer, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.user_id != principal.user_id {
            return Err(AttemptError::AccessDenied);
        }
        if attempt.status != AttemptStatus::InProgress {
            return Err(AttemptError::AttemptNotActive);
        }

        let definition = self.load_test(attempt.test_id).await?;
        let now = self.clock.now();
        let remaining = attempt_timing::remaining_seconds(
            attempt.started_at,
            definition.test.duration_minutes,
            now,
        );
        if remaining == 0 {
            self.finalize(attempt.id, AttemptStatus::TimedOut, CompletionTrigger::Expired).await?;
            return Err(AttemptError::AttemptNotActive);
        }

        let question =
            definition.find_question(command.question_id).ok_or(AttemptError::NotFound("Question"))?;
        let normalized = scoring::normalize_answer(question, command.answer)
            .map_err(|rejection| AttemptError::InvalidAnswer(rejection.to_string()))?;
        let grade = scoring::grade_answer(question, &normalized, self.policy.scoring);

        let stored = self
            .store
            .upsert_answer(AnswerWrite {
                attempt_id: attempt.id,
                question_id: command.question_id,
                option_id: normalized.option_id,
                selected_option_ids: normalized.selected_option_ids,
                text_answer: normalized.text_answer,
                is_correct: grade.is_correct,
                points_earned: grade.points_earned,
                now,
            })
            .await?
            .ok_or(AttemptError::AttemptNotActive)?;

        metrics::answer_submitted();

        let answered = self.store.list_answers(attempt.id).await?.len();
        let progress = events::Progress {
            answered_questions: answered,
            total_questions: definition.questions.len(),
        };
        self.emit(events::answer_submitted(&attempt, command.question_id, progress)).await;
        self.emit(events::student_answered_question(&attempt, progress)).await;

        Ok(stored)
    }

    /// Closes the attempt on behalf of its owner.
    pub(crate) async fn complete(
        &self,
        principal: Principal,
        attempt_id: Uuid,
        trigger: CompletionTrigger,
    ) -> Result<CompletionOutcome, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.user_id != principal.user_id {
            return Err(AttemptError::AccessDenied);
        }
        if attempt.status.is_terminal() {
            return Err(AttemptError::AlreadyCompleted);
        }

        let status = match trigger {
            CompletionTrigger::Timer | CompletionTrigger::Expired => {
                let definition = self.load_test(attempt.test_id).await?;
                let remaining = attempt_timing::remaining_seconds(
                    attempt.started_at,
                    definition.test.duration_minutes,
                    self.clock.now(),
                );
                if !attempt_timing::timer_expiry_accepted(
                    remaining,
                    self.policy.timer_skew_tolerance_seconds,
                ) {
                    return Err(AttemptError::TimeRemaining { remaining });
                }
                AttemptStatus::TimedOut
            }
            CompletionTrigger::User | CompletionTrigger::TabSwitch => AttemptStatus::Completed,
        };

        self.finalize(attempt_id, status, trigger).await?.ok_or(AttemptError::AlreadyCompleted)
    }

    /// System-driven expiry. `None` when another writer already closed the attempt.
    pub(crate) async fn force_timeout(
        &self,
        attempt_id: Uuid,
    ) -> Result<Option<CompletionOutcome>, AttemptError> {
        self.finalize(attempt_id, AttemptStatus::TimedOut, CompletionTrigger::Expired).await
    }

    async fn finalize(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        trigger: CompletionTrigger,
    ) -> Result<Option<CompletionOutcome>, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        let definition = self.load_test(attempt.test_id).await?;
        let now = self.clock.now();
        let duration_minutes = definition.test.duration_minutes;

        let totals = |locked: &Attempt, answers: &[Answer]| {
            let score = scoring::score_attempt(&definition, answers);
            FinalTotals {
                score: score.score,
                max_score: score.max_score,
                percent_score: score.percent_score,
                time_spent: attempt_timing::time_spent_seconds(
                    locked.started_at,
                    duration_minutes,
                    now,
                ),
            }
        };

        let Some(FinalizedAttempt { attempt, answers }) =
            self.store.finalize_attempt(attempt_id, status, now, &totals).await?
        else {
            tracing::debug!(attempt_id = %attempt_id, "Attempt already finalized elsewhere");
            return Ok(None);
        };

        let summary = scoring::score_attempt(&definition, &answers).summary;

        tracing::info!(
            attempt_id = %attempt.id,
            user_id = %attempt.user_id,
            test_id = %attempt.test_id,
            status = attempt.status.as_str(),
            trigger = ?trigger,
            score = attempt.score,
            time_spent = attempt.time_spent,
            "Attempt finalized"
        );
        metrics::attempt_finalized(attempt.status);

        self.emit(events::attempt_completed(&attempt, trigger)).await;
        self.emit(events::student_completed_exam(&attempt, trigger)).await;

        Ok(Some(CompletionOutcome { attempt, summary }))
    }

    pub(crate) async fn get_attempt(
        &self,
        principal: Principal,
        attempt_id: Uuid,
    ) -> Result<AttemptDetails, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if !principal.can_read(&attempt) {
            return Err(AttemptError::AccessDenied);
        }

        let test = self.load_test(attempt.test_id).await?;
        let answers = self.store.list_answers(attempt.id).await?;
        let remaining_seconds = match attempt.status {
            AttemptStatus::InProgress => attempt_timing::remaining_seconds(
                attempt.started_at,
                test.test.duration_minutes,
                self.clock.now(),
            ),
            AttemptStatus::Completed | AttemptStatus::TimedOut => 0,
        };

        Ok(AttemptDetails { attempt, test, answers, remaining_seconds })
    }

    /// Server-authoritative countdown; an expired attempt is timed out on the spot.
    pub(crate) async fn remaining_time(
        &self,
        principal: Principal,
        attempt_id: Uuid,
    ) -> Result<RemainingTime, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if !principal.can_read(&attempt) {
            return Err(AttemptError::AccessDenied);
        }
        if attempt.status.is_terminal() {
            return Ok(RemainingTime { remaining_seconds: 0, status: attempt.status });
        }

        let definition = self.load_test(attempt.test_id).await?;
        let remaining_seconds = attempt_timing::remaining_seconds(
            attempt.started_at,
            definition.test.duration_minutes,
            self.clock.now(),
        );
        if remaining_seconds > 0 {
            return Ok(RemainingTime { remaining_seconds, status: attempt.status });
        }

        let status = match self.force_timeout(attempt.id).await? {
            Some(outcome) => outcome.attempt.status,
            None => self.load_attempt(attempt.id).await?.status,
        };
        Ok(RemainingTime { remaining_seconds: 0, status })
    }

    pub(crate) async fn live_attempts(
        &self,
        test_id: Option<Uuid>,
    ) -> Result<Vec<LiveAttemptView>, AttemptError> {
        let now = self.clock.now();
        let live = self.store.list_live_attempts(test_id).await?;

        Ok(live
            .into_iter()
            .map(|live| {
                let remaining_seconds = attempt_timing::remaining_seconds(
                    live.attempt.started_at,
                    live.duration_minutes,
                    now,
                );
                LiveAttemptView { live, remaining_seconds }
            })
            .collect())
    }

    /// Times out one page of overdue attempts following `after`. A failed id is still
    /// passed over, so the next page starts beyond it.
    pub(crate) async fn expire_overdue(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<ExpiryPage, AttemptError> {
        let overdue = self.store.list_overdue_attempts(self.clock.now(), after, limit).await?;
        let full_page = i64::try_from(overdue.len()).map_or(true, |fetched| fetched >= limit);
        let mut page = ExpiryPage {
            next_after: if full_page { overdue.last().copied() } else { None },
            ..ExpiryPage::default()
        };

        for attempt_id in overdue {
            match self.force_timeout(attempt_id).await {
                Ok(Some(_)) => page.closed += 1,
                Ok(None) => {}
                Err(err) => {
                    page.failed += 1;
                    tracing::error!(attempt_id = %attempt_id, error = %err, "Failed to expire attempt");
                }
            }
        }

        Ok(page)
    }
}
