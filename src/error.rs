use thiserror::Error;

use crate::schedule::model::ItemId;

/// Failure to adopt a schedule returned by the text-to-schedule service.
///
/// Ingestion is all-or-nothing: any of these leaves the current schedule untouched.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("schedule response must be a JSON list of items")]
    NotAList,

    #[error("schedule item at index {index} is malformed: {message}")]
    InvalidEntry { index: usize, message: String },

    #[error("schedule item at index {index} has invalid {field} '{value}', expected HH:MM")]
    InvalidTime {
        index: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeTravelError {
    #[error("item '{0}' is not part of the loaded schedule")]
    UnknownItem(ItemId),
}
