use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::types::{AttemptStatus, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Test {
    pub(crate) id: Uuid,
    pub(crate) title: String,
    pub(crate) duration_minutes: i32,
    pub(crate) max_attempts: i32,
    pub(crate) is_published: bool,
    pub(crate) available_from: Option<PrimitiveDateTime>,
    pub(crate) available_until: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) question_type: QuestionType,
    pub(crate) text: String,
    pub(crate) points: f64,
    pub(crate) order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionOption {
    pub(crate) id: Uuid,
    pub(crate) question_id: Uuid,
    pub(crate) text: String,
    pub(crate) is_correct: bool,
    pub(crate) order_index: i32,
}

/// A question together with its options, ordered by `order_index`.
#[derive(Debug, Clone)]
pub(crate) struct QuestionWithOptions {
    pub(crate) question: Question,
    pub(crate) options: Vec<QuestionOption>,
}

/// A test with its full ordered question tree.
#[derive(Debug, Clone)]
pub(crate) struct TestDefinition {
    pub(crate) test: Test,
    pub(crate) questions: Vec<QuestionWithOptions>,
}

impl TestDefinition {
    pub(crate) fn find_question(&self, question_id: Uuid) -> Option<&QuestionWithOptions> {
        self.questions.iter().find(|item| item.question.id == question_id)
    }

    pub(crate) fn max_score(&self) -> f64 {
        self.questions.iter().map(|item| item.question.points).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) test_id: Uuid,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
    pub(crate) score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percent_score: Option<f64>,
    pub(crate) time_spent: Option<i32>,
    pub(crate) ip_address: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Answer {
    pub(crate) id: Uuid,
    pub(crate) attempt_id: Uuid,
    pub(crate) question_id: Uuid,
    pub(crate) option_id: Option<Uuid>,
    pub(crate) selected_option_ids: Json<Vec<Uuid>>,
    pub(crate) text_answer: Option<String>,
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// In-progress attempt joined with the progress counters shown on the monitor.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct LiveAttemptRow {
    #[sqlx(flatten)]
    pub(crate) attempt: Attempt,
    pub(crate) test_title: String,
    pub(crate) duration_minutes: i32,
    pub(crate) total_questions: i64,
    pub(crate) answered_questions: i64,
}
