use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// No sensible default exists; surfaced to the caller.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("invalid course key: {0:?}")]
    InvalidCourseKey(String),

    #[error("data integrity violation for {course_id} (user {user_id}): {reason}")]
    DataIntegrity {
        course_id: String,
        user_id: i64,
        reason: String,
    },

    #[error("date {0} is outside the supported calendar range")]
    DateOutOfRange(chrono::NaiveDate),
}

impl AnalyticsError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalyticsError::Misconfiguration(_))
    }
}
