//! Grading of individual answers and aggregation of a finished attempt.
//!
//! Everything here is a pure function of its inputs so that a stored attempt can be
//! re-scored at any time with the same result.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Answer, QuestionWithOptions, TestDefinition};
use crate::db::types::QuestionType;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScoringPolicy {
    pub(crate) multi_select_partial_credit: bool,
}

/// Raw answer as submitted by the client.
#[derive(Debug, Clone, Default)]
pub(crate) struct SubmittedAnswer {
    pub(crate) option_id: Option<Uuid>,
    pub(crate) option_ids: Vec<Uuid>,
    pub(crate) text_answer: Option<String>,
}

/// Answer reduced to the shape stored for its question type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NormalizedAnswer {
    pub(crate) option_id: Option<Uuid>,
    pub(crate) selected_option_ids: Vec<Uuid>,
    pub(crate) text_answer: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum AnswerRejection {
    #[error("optionId is required for this question type")]
    MissingOption,
    #[error("exactly one option must be selected for this question type")]
    MultipleOptions,
    #[error("option {0} does not belong to this question")]
    ForeignOption(Uuid),
    #[error("textAnswer is required for this question type")]
    MissingText,
    #[error("options are not accepted for free-text questions")]
    UnexpectedOption,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Grade {
    pub(crate) is_correct: bool,
    pub(crate) points_earned: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct AttemptSummary {
    pub(crate) total_questions: usize,
    pub(crate) correct_answers: usize,
    pub(crate) incorrect_answers: usize,
    pub(crate) unanswered_questions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AttemptScore {
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) percent_score: f64,
    pub(crate) summary: AttemptSummary,
}

pub(crate) fn normalize_answer(
    question: &QuestionWithOptions,
    submitted: SubmittedAnswer,
) -> Result<NormalizedAnswer, AnswerRejection> {
    let known: HashSet<Uuid> = question.options.iter().map(|option| option.id).collect();
    let ensure_known = |id: Uuid| {
        if known.contains(&id) {
            Ok(id)
        } else {
            Err(AnswerRejection::ForeignOption(id))
        }
    };

    let qtype = question.question.question_type;
    if qtype.is_choice() {
        let mut ids: BTreeSet<Uuid> = submitted.option_ids.into_iter().collect();
        ids.extend(submitted.option_id);
        let option_id = match ids.len() {
            0 => return Err(AnswerRejection::MissingOption),
            1 => ids.into_iter().next().ok_or(AnswerRejection::MissingOption)?,
            _ => return Err(AnswerRejection::MultipleOptions),
        };
        let option_id = ensure_known(option_id)?;
        return Ok(NormalizedAnswer {
            option_id: Some(option_id),
            selected_option_ids: vec![option_id],
            text_answer: None,
        });
    }

    if qtype == QuestionType::MultiSelect {
        let mut ids: BTreeSet<Uuid> = submitted.option_ids.into_iter().collect();
        ids.extend(submitted.option_id);
        let selected = ids.into_iter().map(ensure_known).collect::<Result<Vec<_>, _>>()?;
        return Ok(NormalizedAnswer {
            option_id: None,
            selected_option_ids: selected,
            text_answer: None,
        });
    }

    debug_assert!(qtype.is_free_text());
    if submitted.option_id.is_some() || !submitted.option_ids.is_empty() {
        return Err(AnswerRejection::UnexpectedOption);
    }
    let text = submitted.text_answer.ok_or(AnswerRejection::MissingText)?;
    Ok(NormalizedAnswer { option_id: None, selected_option_ids: Vec::new(), text_answer: Some(text) })
}

pub(crate) fn grade_answer(
    question: &QuestionWithOptions,
    answer: &NormalizedAnswer,
    policy: ScoringPolicy,
) -> Grade {
    let points = question.question.points;
    let correct: BTreeSet<Uuid> =
        question.options.iter().filter(|option| option.is_correct).map(|option| option.id).collect();

    match question.question.question_type {
        QuestionType::SingleChoice | QuestionType::TrueFalse => {
            let is_correct = answer.option_id.is_some_and(|id| correct.contains(&id));
            Grade { is_correct, points_earned: if is_correct { points } else { 0.0 } }
        }
        QuestionType::MultiSelect => {
            let selected: BTreeSet<Uuid> = answer.selected_option_ids.iter().copied().collect();
            let is_correct = selected == correct;
            let points_earned = if is_correct {
                points
            } else if policy.multi_select_partial_credit && !correct.is_empty() {
                let hits = selected.intersection(&correct).count() as f64;
                let misses = selected.difference(&correct).count() as f64;
                points * (hits - misses).max(0.0) / correct.len() as f64
            } else {
                0.0
            };
            Grade { is_correct, points_earned }
        }
        // Free-text answers wait for manual grading.
        QuestionType::ShortAnswer | QuestionType::Essay => {
            Grade { is_correct: false, points_earned: 0.0 }
        }
    }
}

/// Folds stored answers into the attempt totals against the test's current questions.
pub(crate) fn score_attempt(definition: &TestDefinition, answers: &[Answer]) -> AttemptScore {
    let score: f64 = answers.iter().map(|answer| answer.points_earned).sum();
    let max_score = definition.max_score();
    let percent_score = if max_score > 0.0 { score / max_score * 100.0 } else { 0.0 };

    let question_ids: HashSet<Uuid> =
        definition.questions.iter().map(|item| item.question.id).collect();
    let mut answered = HashSet::new();
    let mut correct_answers = 0;
    for answer in answers {
        let counted =
            question_ids.contains(&answer.question_id) && answered.insert(answer.question_id);
        if counted && answer.is_correct {
            correct_answers += 1;
        }
    }

    let total_questions = question_ids.len();
    AttemptScore {
        score,
        max_score,
        percent_score,
        summary: AttemptSummary {
            total_questions,
            correct_answers,
            incorrect_answers: answered.len() - correct_answers,
            unanswered_questions: total_questions - answered.len(),
        },
    }
}
