use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    UnspecifiedData,
    Misconfiguration,
    DataIntegrity,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineErrorKind::UnspecifiedData => "unspecified_data",
            PipelineErrorKind::Misconfiguration => "misconfiguration",
            PipelineErrorKind::DataIntegrity => "data_integrity",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineError {
    pub error_type: PipelineErrorKind,
    pub message: String,
    pub context: Value,
    pub logged_at: DateTime<Utc>,
}

/// Append-only record of aggregation failures. Safe to share between
/// concurrent writers; nothing in the aggregation path reads it back.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<PipelineError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never fails: a poisoned lock is recovered rather than propagated.
    pub fn log_error(
        &self,
        error_type: PipelineErrorKind,
        message: impl Into<String>,
        context: Value,
    ) {
        let record = PipelineError {
            error_type,
            message: message.into(),
            context,
            logged_at: Utc::now(),
        };
        warn!(
            error_type = record.error_type.as_str(),
            context = %record.context,
            "{}",
            record.message
        );
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn entries(&self) -> Vec<PipelineError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
