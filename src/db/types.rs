use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "attemptstatus", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum AttemptStatus {
    InProgress,
    Completed,
    TimedOut,
}

impl AttemptStatus {
    pub(crate) fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Completed => "COMPLETED",
            AttemptStatus::TimedOut => "TIMED_OUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "questiontype", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum QuestionType {
    SingleChoice,
    TrueFalse,
    MultiSelect,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub(crate) fn is_choice(self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::TrueFalse)
    }

    pub(crate) fn is_free_text(self) -> bool {
        matches!(self, QuestionType::ShortAnswer | QuestionType::Essay)
    }
}

/// Carried in the access token only; there is no users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UserRole {
    Student,
    Instructor,
    Admin,
}

impl UserRole {
    /// Instructors and admins may read any attempt.
    pub(crate) fn is_staff(self) -> bool {
        matches!(self, UserRole::Instructor | UserRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_serializes_in_screaming_case() {
        let value = serde_json::to_value(AttemptStatus::TimedOut).unwrap();
        assert_eq!(value, serde_json::json!("TIMED_OUT"));
        assert_eq!(AttemptStatus::TimedOut.as_str(), "TIMED_OUT");
    }

    #[test]
    fn token_roles_parse_in_lowercase() {
        let role: UserRole = serde_json::from_str("\"instructor\"").unwrap();
        assert_eq!(role, UserRole::Instructor);
        assert!(role.is_staff());
        assert!(serde_json::from_str::<UserRole>("\"Admin\"").is_err());
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(AttemptStatus::Completed.is_terminal());
        assert!(AttemptStatus::TimedOut.is_terminal());
    }

    #[test]
    fn role_parses_from_lowercase() {
        let role: UserRole = serde_json::from_str("\"instructor\"").unwrap();
        assert!(role.is_staff());
        assert!(!UserRole::Student.is_staff());
    }
}
