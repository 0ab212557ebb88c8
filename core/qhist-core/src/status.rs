//! Run status and the transitions allowed between statuses.
//!
//! ```text
//! InProgress ──► Completed   (terminal)
//!      │
//!      └───────► Failed      (terminal)
//! ```
//!
//! Cancellation is owned by the collaborator that started the run; it ends up
//! reporting `Failed` (with a reason), or `Completed` when it raced with a
//! natural finish.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryStatus {
    InProgress,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, QueryStatus::InProgress)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            QueryStatus::InProgress => "in progress",
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Returns the status a run moves to, or `None` when the move is refused.
///
/// Re-reporting the current status is accepted so collaborators can refresh
/// result counts on a finished run. Nothing leaves a terminal status.
pub fn next_status(current: QueryStatus, reported: QueryStatus) -> Option<QueryStatus> {
    match (current, reported) {
        (a, b) if a == b => Some(b),
        (QueryStatus::InProgress, next) => Some(next),
        _ => None,
    }
}

/// Status of a variant analysis as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantAnalysisStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl From<VariantAnalysisStatus> for QueryStatus {
    fn from(status: VariantAnalysisStatus) -> Self {
        match status {
            VariantAnalysisStatus::InProgress => QueryStatus::InProgress,
            VariantAnalysisStatus::Succeeded => QueryStatus::Completed,
            VariantAnalysisStatus::Failed | VariantAnalysisStatus::Canceled => QueryStatus::Failed,
        }
    }
}
