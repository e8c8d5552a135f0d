use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{Answer, Attempt, QuestionWithOptions, TestDefinition};
use crate::db::types::{AttemptStatus, QuestionType};
use crate::services::attempt_lifecycle::{
    AnswerCommand, AttemptDetails, CompletionOutcome, CompletionTrigger, LiveAttemptView,
    RemainingTime,
};
use crate::services::scoring::{AttemptSummary, SubmittedAnswer};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitAnswerRequest {
    #[serde(alias = "questionId")]
    pub(crate) question_id: Uuid,
    #[serde(default, alias = "optionId")]
    pub(crate) option_id: Option<Uuid>,
    #[serde(default, alias = "optionIds")]
    #[validate(length(max = 100))]
    pub(crate) option_ids: Vec<Uuid>,
    #[serde(default, alias = "textAnswer")]
    #[validate(length(max = 20000))]
    pub(crate) text_answer: Option<String>,
}

impl SubmitAnswerRequest {
    pub(crate) fn into_command(self) -> AnswerCommand {
        AnswerCommand {
            question_id: self.question_id,
            answer: SubmittedAnswer {
                option_id: self.option_id,
                option_ids: self.option_ids,
                text_answer: self.text_answer,
            },
        }
    }
}

/// Triggers a client may report. Server-side expiry is not one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ClientTrigger {
    User,
    #[serde(alias = "tabSwitch")]
    TabSwitch,
    Timer,
}

impl From<ClientTrigger> for CompletionTrigger {
    fn from(trigger: ClientTrigger) -> Self {
        match trigger {
            ClientTrigger::User => CompletionTrigger::User,
            ClientTrigger::TabSwitch => CompletionTrigger::TabSwitch,
            ClientTrigger::Timer => CompletionTrigger::Timer,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompleteRequest {
    #[serde(default)]
    pub(crate) trigger: Option<ClientTrigger>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) completed_at: Option<String>,
    pub(crate) score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percent_score: Option<f64>,
    pub(crate) time_spent: Option<i32>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Attempt> for AttemptResponse {
    fn from(attempt: Attempt) -> Self {
        Self {
            id: attempt.id,
            user_id: attempt.user_id,
            test_id: attempt.test_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: format_primitive(attempt.started_at),
            completed_at: attempt.completed_at.map(format_primitive),
            score: attempt.score,
            max_score: attempt.max_score,
            percent_score: attempt.percent_score,
            time_spent: attempt.time_spent,
            created_at: format_primitive(attempt.created_at),
            updated_at: format_primitive(attempt.updated_at),
        }
    }
}

/// Grading fields stay `None` until the viewer may see them.
#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) id: Uuid,
    pub(crate) attempt_id: Uuid,
    pub(crate) question_id: Uuid,
    pub(crate) option_id: Option<Uuid>,
    pub(crate) option_ids: Vec<Uuid>,
    pub(crate) text_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) points_earned: Option<f64>,
    pub(crate) updated_at: String,
}

impl AnswerResponse {
    pub(crate) fn from_answer(answer: Answer, reveal_grading: bool) -> Self {
        Self {
            id: answer.id,
            attempt_id: answer.attempt_id,
            question_id: answer.question_id,
            option_id: answer.option_id,
            option_ids: answer.selected_option_ids.0,
            text_answer: answer.text_answer,
            is_correct: reveal_grading.then_some(answer.is_correct),
            points_earned: reveal_grading.then_some(answer.points_earned),
            updated_at: format_primitive(answer.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OptionResponse {
    pub(crate) id: Uuid,
    pub(crate) text: String,
    pub(crate) order_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: Uuid,
    pub(crate) question_type: QuestionType,
    pub(crate) text: String,
    pub(crate) points: f64,
    pub(crate) order_index: i32,
    pub(crate) options: Vec<OptionResponse>,
}

impl QuestionResponse {
    fn from_question(item: QuestionWithOptions, reveal_grading: bool) -> Self {
        let QuestionWithOptions { question, options } = item;
        Self {
            id: question.id,
            question_type: question.question_type,
            text: question.text,
            points: question.points,
            order_index: question.order_index,
            options: options
                .into_iter()
                .map(|option| OptionResponse {
                    id: option.id,
                    text: option.text,
                    order_index: option.order_index,
                    is_correct: reveal_grading.then_some(option.is_correct),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TestResponse {
    pub(crate) id: Uuid,
    pub(crate) title: String,
    pub(crate) duration_minutes: i32,
    pub(crate) max_attempts: i32,
    pub(crate) questions: Vec<QuestionResponse>,
}

impl TestResponse {
    fn from_definition(definition: TestDefinition, reveal_grading: bool) -> Self {
        let TestDefinition { test, questions } = definition;
        Self {
            id: test.id,
            title: test.title,
            duration_minutes: test.duration_minutes,
            max_attempts: test.max_attempts,
            questions: questions
                .into_iter()
                .map(|question| QuestionResponse::from_question(question, reveal_grading))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptDetailResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) test: TestResponse,
    pub(crate) answers: Vec<AnswerResponse>,
    pub(crate) remaining_time: i64,
}

impl AttemptDetailResponse {
    pub(crate) fn from_details(details: AttemptDetails, reveal_grading: bool) -> Self {
        Self {
            test: TestResponse::from_definition(details.test, reveal_grading),
            answers: details
                .answers
                .into_iter()
                .map(|answer| AnswerResponse::from_answer(answer, reveal_grading))
                .collect(),
            remaining_time: details.remaining_seconds,
            attempt: details.attempt.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RemainingTimeResponse {
    pub(crate) remaining_time: i64,
    pub(crate) status: AttemptStatus,
}

impl From<RemainingTime> for RemainingTimeResponse {
    fn from(value: RemainingTime) -> Self {
        Self { remaining_time: value.remaining_seconds, status: value.status }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CompletionResponse {
    pub(crate) attempt: AttemptResponse,
    pub(crate) summary: AttemptSummary,
}

impl From<CompletionOutcome> for CompletionResponse {
    fn from(outcome: CompletionOutcome) -> Self {
        Self { attempt: outcome.attempt.into(), summary: outcome.summary }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LiveAttemptResponse {
    pub(crate) attempt_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) test_title: String,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: String,
    pub(crate) remaining_time: i64,
    pub(crate) answered_questions: i64,
    pub(crate) total_questions: i64,
}

impl From<LiveAttemptView> for LiveAttemptResponse {
    fn from(view: LiveAttemptView) -> Self {
        let live = view.live;
        Self {
            attempt_id: live.attempt.id,
            user_id: live.attempt.user_id,
            test_id: live.attempt.test_id,
            test_title: live.test_title,
            attempt_number: live.attempt.attempt_number,
            started_at: format_primitive(live.attempt.started_at),
            remaining_time: view.remaining_seconds,
            answered_questions: live.answered_questions,
            total_questions: live.total_questions,
        }
    }
}
