use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::core::time::format_primitive;
use crate::db::models::Attempt;
use crate::services::attempt_lifecycle::CompletionTrigger;
use crate::services::attempt_timing;

const ADMIN_TOPIC: &str = "admin";
const ATTEMPT_TOPIC_PREFIX: &str = "attempt:";

/// Audience of an event: everyone following one attempt, or the admin monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub(crate) enum Topic {
    Attempt(Uuid),
    Admin,
}

impl Topic {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        if value == ADMIN_TOPIC {
            return Some(Topic::Admin);
        }
        let id = value.strip_prefix(ATTEMPT_TOPIC_PREFIX)?;
        Uuid::parse_str(id).ok().map(Topic::Attempt)
    }

    pub(crate) fn scope(self) -> &'static str {
        match self {
            Topic::Attempt(_) => "attempt",
            Topic::Admin => "admin",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Attempt(id) => write!(f, "{ATTEMPT_TOPIC_PREFIX}{id}"),
            Topic::Admin => f.write_str(ADMIN_TOPIC),
        }
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl TryFrom<String> for Topic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value).ok_or_else(|| format!("unknown topic: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EventKind {
    AttemptStarted,
    AnswerSubmitted,
    AttemptCompleted,
    StudentStartedExam,
    StudentAnsweredQuestion,
    StudentCompletedExam,
}

/// Frame pushed to subscribers: `{topic, event, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RealtimeEvent {
    pub(crate) topic: Topic,
    pub(crate) event: EventKind,
    pub(crate) payload: serde_json::Value,
}

/// Progress counters shared by the answer events.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Progress {
    pub(crate) answered_questions: usize,
    pub(crate) total_questions: usize,
}

pub(crate) fn attempt_started(attempt: &Attempt, duration_minutes: i32) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Attempt(attempt.id),
        event: EventKind::AttemptStarted,
        payload: json!({
            "attempt_id": attempt.id,
            "test_id": attempt.test_id,
            "attempt_number": attempt.attempt_number,
            "started_at": format_primitive(attempt.started_at),
            "expires_at": format_primitive(attempt_timing::deadline(
                attempt.started_at,
                duration_minutes,
            )),
            "duration_minutes": duration_minutes,
        }),
    }
}

pub(crate) fn student_started_exam(
    attempt: &Attempt,
    test_title: &str,
    duration_minutes: i32,
    total_questions: usize,
) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Admin,
        event: EventKind::StudentStartedExam,
        payload: json!({
            "attempt_id": attempt.id,
            "user_id": attempt.user_id,
            "test_id": attempt.test_id,
            "test_title": test_title,
            "attempt_number": attempt.attempt_number,
            "started_at": format_primitive(attempt.started_at),
            "duration_minutes": duration_minutes,
            "total_questions": total_questions,
        }),
    }
}

pub(crate) fn answer_submitted(
    attempt: &Attempt,
    question_id: Uuid,
    progress: Progress,
) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Attempt(attempt.id),
        event: EventKind::AnswerSubmitted,
        payload: json!({
            "attempt_id": attempt.id,
            "question_id": question_id,
            "answered_questions": progress.answered_questions,
            "total_questions": progress.total_questions,
        }),
    }
}

/// Carries progress only; answer content never reaches the admin audience.
pub(crate) fn student_answered_question(attempt: &Attempt, progress: Progress) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Admin,
        event: EventKind::StudentAnsweredQuestion,
        payload: json!({
            "attempt_id": attempt.id,
            "user_id": attempt.user_id,
            "test_id": attempt.test_id,
            "answered_questions": progress.answered_questions,
            "total_questions": progress.total_questions,
        }),
    }
}

fn completion_payload(attempt: &Attempt, trigger: CompletionTrigger) -> serde_json::Value {
    json!({
        "attempt_id": attempt.id,
        "user_id": attempt.user_id,
        "test_id": attempt.test_id,
        "status": attempt.status,
        "score": attempt.score,
        "max_score": attempt.max_score,
        "percent_score": attempt.percent_score,
        "time_spent": attempt.time_spent,
        "completed_at": attempt.completed_at.map(format_primitive),
        "trigger": trigger,
    })
}

pub(crate) fn attempt_completed(attempt: &Attempt, trigger: CompletionTrigger) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Attempt(attempt.id),
        event: EventKind::AttemptCompleted,
        payload: completion_payload(attempt, trigger),
    }
}

pub(crate) fn student_completed_exam(
    attempt: &Attempt,
    trigger: CompletionTrigger,
) -> RealtimeEvent {
    RealtimeEvent {
        topic: Topic::Admin,
        event: EventKind::StudentCompletedExam,
        payload: completion_payload(attempt, trigger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_round_trip_through_strings() {
        let id = Uuid::new_v4();

        assert_eq!(Topic::parse(&format!("attempt:{id}")), Some(Topic::Attempt(id)));
        assert_eq!(Topic::parse("admin"), Some(Topic::Admin));
        assert_eq!(Topic::parse("attempt:not-a-uuid"), None);
        assert_eq!(Topic::parse("lobby"), None);
        assert_eq!(Topic::Attempt(id).to_string(), format!("attempt:{id}"));
    }

    #[test]
    fn frame_serializes_topic_and_event_names() {
        let event = RealtimeEvent {
            topic: Topic::Admin,
            event: EventKind::StudentAnsweredQuestion,
            payload: json!({"answered_questions": 1}),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["topic"], "admin");
        assert_eq!(value["event"], "student_answered_question");

        let parsed: RealtimeEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }
}
