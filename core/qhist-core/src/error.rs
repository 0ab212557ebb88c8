//! Error types for qhist-core operations.

use std::path::PathBuf;

use crate::status::QueryStatus;

/// All errors that can occur in qhist-core operations.
///
/// User-input errors abort the operation before any state is mutated.
/// Persistence errors fail the read rather than discarding history.
/// Sweep and bulk errors are aggregated after every sub-operation has run.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    // ─────────────────────────────────────────────────────────────────────
    // Selection / Comparison Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Please only select local queries that have completed successfully.")]
    NotCompletedQuery,

    #[error("Query databases must be the same.")]
    DatabasesDiffer,

    #[error("Please select no more than 2 queries.")]
    TooManySelected,

    #[error("No other queries available to compare with.")]
    NoOtherQueries,

    #[error("No query selected. Select a query history item you have already run and try again.")]
    NothingSelected,

    #[error("History item not found: {0}")]
    ItemNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: QueryStatus,
        to: QueryStatus,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unsupported query history version {found} in {path} (supported: {supported})")]
    UnsupportedHistoryVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Key-value store error: {0}")]
    KeyValue(String),

    // ─────────────────────────────────────────────────────────────────────
    // Aggregated Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Error while scrubbing queries:\n{}", failures.join("\n"))]
    ScrubFailed { failures: Vec<String> },

    #[error("{operation} failed for {} item(s):\n{}", failures.len(), failures.join("\n"))]
    Bulk {
        operation: String,
        failures: Vec<String>,
    },

    #[error("Collaborator failed: {0}")]
    Collaborator(String),
}

/// Convenience type alias for Results using HistoryError.
pub type Result<T> = std::result::Result<T, HistoryError>;

impl HistoryError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HistoryError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        HistoryError::Json {
            context: context.into(),
            source,
        }
    }

    /// True for errors caused by the user's selection rather than the system.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            HistoryError::NotCompletedQuery
                | HistoryError::DatabasesDiffer
                | HistoryError::TooManySelected
                | HistoryError::NoOtherQueries
                | HistoryError::NothingSelected
        )
    }
}
