use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Question, QuestionOption, QuestionWithOptions, Test, TestDefinition};

pub(crate) const TEST_COLUMNS: &str = "\
    id, title, duration_minutes, max_attempts, is_published, \
    available_from, available_until, created_at, updated_at";

pub(crate) const QUESTION_COLUMNS: &str = "id, test_id, question_type, text, points, order_index";

pub(crate) async fn find_test(pool: &PgPool, id: Uuid) -> Result<Option<Test>, sqlx::Error> {
    sqlx::query_as::<_, Test>(&format!("SELECT {TEST_COLUMNS} FROM tests WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_questions(
    pool: &PgPool,
    test_id: Uuid,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE test_id = $1 ORDER BY order_index, id"
    ))
    .bind(test_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_options_for_test(
    pool: &PgPool,
    test_id: Uuid,
) -> Result<Vec<QuestionOption>, sqlx::Error> {
    sqlx::query_as::<_, QuestionOption>(
        "SELECT o.id, o.question_id, o.text, o.is_correct, o.order_index \
         FROM question_options o \
         JOIN questions q ON q.id = o.question_id \
         WHERE q.test_id = $1 \
         ORDER BY o.question_id, o.order_index, o.id",
    )
    .bind(test_id)
    .fetch_all(pool)
    .await
}

/// Loads a test with its ordered questions and options in three round trips.
pub(crate) async fn load_definition(
    pool: &PgPool,
    test_id: Uuid,
) -> Result<Option<TestDefinition>, sqlx::Error> {
    let Some(test) = find_test(pool, test_id).await? else {
        return Ok(None);
    };

    let questions = list_questions(pool, test_id).await?;
    let options = list_options_for_test(pool, test_id).await?;

    Ok(Some(assemble_definition(test, questions, options)))
}

pub(crate) fn assemble_definition(
    test: Test,
    questions: Vec<Question>,
    options: Vec<QuestionOption>,
) -> TestDefinition {
    let mut by_question: HashMap<Uuid, Vec<QuestionOption>> = HashMap::new();
    for option in options {
        by_question.entry(option.question_id).or_default().push(option);
    }

    let questions = questions
        .into_iter()
        .map(|question| {
            let mut options = by_question.remove(&question.id).unwrap_or_default();
            options.sort_by_key(|option| option.order_index);
            QuestionWithOptions { question, options }
        })
        .collect();

    TestDefinition { test, questions }
}
