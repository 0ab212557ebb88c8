//! History item model.
//!
//! A [`HistoryItem`] carries the fields every run shares (identity, status,
//! timing, result count, labels) and a [`RunPayload`] owned by whichever
//! collaborator started the run. The payload is only read for display and
//! delegation; the core never edits it.
//!
//! # Serialized Form
//!
//! ```json
//! {
//!   "t": "local",
//!   "id": "run-1",
//!   "status": "Completed",
//!   "startTime": "2024-01-01T00:00:00Z",
//!   "resultCount": 12,
//!   "queryName": "...", "databaseName": "..."
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};
use crate::status::{next_status, QueryStatus};

/// Discriminant of a run, mirroring the [`RunPayload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunKind {
    Local,
    Remote,
    VariantAnalysis,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunKind::Local => "local",
            RunKind::Remote => "remote",
            RunKind::VariantAnalysis => "variant-analysis",
        };
        f.write_str(text)
    }
}

/// A query run against a single local database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRun {
    pub query_name: String,
    pub query_path: String,
    pub database_name: String,
    /// Query language of the database, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Directory holding the run's output files and its `timestamp` marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub is_quick_eval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_time_ms: Option<u64>,
}

/// A query submitted against a batch of remote repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRun {
    pub query_name: String,
    pub query_file_path: String,
    pub language: String,
    pub controller_repository: String,
    pub repository_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_workflow_run_id: Option<u64>,
}

/// A variant analysis spanning many repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnalysisRun {
    pub variant_analysis_id: u64,
    pub query_name: String,
    pub query_file_path: String,
    pub language: String,
    pub controller_repository: String,
    pub repository_count: u32,
    #[serde(default)]
    pub completed_repository_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_workflow_run_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum RunPayload {
    Local(LocalRun),
    Remote(RemoteRun),
    VariantAnalysis(VariantAnalysisRun),
}

impl RunPayload {
    pub fn kind(&self) -> RunKind {
        match self {
            RunPayload::Local(_) => RunKind::Local,
            RunPayload::Remote(_) => RunKind::Remote,
            RunPayload::VariantAnalysis(_) => RunKind::VariantAnalysis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    id: String,
    status: QueryStatus,
    start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_specified_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(flatten)]
    run: RunPayload,
}

impl HistoryItem {
    /// Creates an in-progress item. Ids are chosen by the collaborator.
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>, run: RunPayload) -> Self {
        HistoryItem {
            id: id.into(),
            status: QueryStatus::InProgress,
            start_time,
            result_count: None,
            user_specified_label: None,
            failure_reason: None,
            run,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> RunKind {
        self.run.kind()
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn result_count(&self) -> Option<u64> {
        self.result_count
    }

    pub fn user_specified_label(&self) -> Option<&str> {
        self.user_specified_label.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn run(&self) -> &RunPayload {
        &self.run
    }

    pub fn query_name(&self) -> &str {
        match &self.run {
            RunPayload::Local(run) => &run.query_name,
            RunPayload::Remote(run) => &run.query_name,
            RunPayload::VariantAnalysis(run) => &run.query_name,
        }
    }

    pub fn query_file_path(&self) -> &str {
        match &self.run {
            RunPayload::Local(run) => &run.query_path,
            RunPayload::Remote(run) => &run.query_file_path,
            RunPayload::VariantAnalysis(run) => &run.query_file_path,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match &self.run {
            RunPayload::Local(run) => run.language.as_deref(),
            RunPayload::Remote(run) => Some(&run.language),
            RunPayload::VariantAnalysis(run) => Some(&run.language),
        }
    }

    /// Name of what the run was evaluated against.
    ///
    /// Local runs compare by this value, so two local runs are only comparable
    /// when their target names are equal.
    pub fn target_name(&self) -> String {
        match &self.run {
            RunPayload::Local(run) => run.database_name.clone(),
            RunPayload::Remote(run) => format!("{} repositories", run.repository_count),
            RunPayload::VariantAnalysis(run) => format!(
                "{}/{} repositories",
                run.completed_repository_count, run.repository_count
            ),
        }
    }

    /// On-disk artifact directory, for runs whose artifacts the core can see.
    pub fn artifact_dir(&self) -> Option<&Path> {
        match &self.run {
            RunPayload::Local(run) => run.output_dir.as_deref(),
            RunPayload::Remote(_) | RunPayload::VariantAnalysis(_) => None,
        }
    }

    pub fn is_completed_local(&self) -> bool {
        self.kind() == RunKind::Local && self.status == QueryStatus::Completed
    }

    /// Derived display state: whether opening this run would show results.
    pub fn has_results(&self) -> bool {
        match (&self.run, self.status) {
            (_, QueryStatus::InProgress | QueryStatus::Failed) => false,
            (RunPayload::Local(_), QueryStatus::Completed) => self.result_count.unwrap_or(0) > 0,
            (_, QueryStatus::Completed) => true,
        }
    }

    /// Applies a status report from the owning collaborator.
    ///
    /// Returns `Ok(true)` when anything about the item changed. A report that
    /// would leave a terminal status is refused and leaves the item untouched.
    pub fn apply_status(
        &mut self,
        reported: QueryStatus,
        failure_reason: Option<String>,
        result_count: Option<u64>,
    ) -> Result<bool> {
        let next = next_status(self.status, reported).ok_or_else(|| {
            HistoryError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: reported,
            }
        })?;

        let before = (self.status, self.failure_reason.clone(), self.result_count);
        self.status = next;
        match next {
            QueryStatus::Failed => {
                if failure_reason.is_some() {
                    self.failure_reason = failure_reason;
                }
            }
            QueryStatus::Completed => {
                if result_count.is_some() {
                    self.result_count = result_count;
                }
            }
            QueryStatus::InProgress => {}
        }

        Ok(before != (self.status, self.failure_reason.clone(), self.result_count))
    }

    /// Replaces the collaborator payload with a fresher snapshot of the same kind.
    pub fn replace_run(&mut self, run: RunPayload) -> Result<()> {
        if run.kind() != self.kind() {
            return Err(HistoryError::Collaborator(format!(
                "payload kind {} does not match {} item {}",
                run.kind(),
                self.kind(),
                self.id
            )));
        }
        self.run = run;
        Ok(())
    }

    /// Sets the user label. An empty label means "use the default label".
    /// Returns whether the label changed.
    pub fn set_user_specified_label(&mut self, label: Option<String>) -> bool {
        let label = label.filter(|l| !l.is_empty());
        if self.user_specified_label == label {
            return false;
        }
        self.user_specified_label = label;
        true
    }
}
