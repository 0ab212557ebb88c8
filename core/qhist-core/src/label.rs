//! Display labels for history items.
//!
//! Labels come from a user-editable format string. Both placeholder styles
//! are accepted and may be mixed:
//!
//! | Short | Long                   | Value                                  |
//! |-------|------------------------|----------------------------------------|
//! | `%t`  | `${startTime}`         | Local start time                       |
//! | `%q`  | `${queryName}`         | Query name (with language for remote)  |
//! | `%d`  | `${databaseName}`      | Target name                            |
//! | `%s`  | `${status}`            | Human-readable status                  |
//! | `%f`  | `${queryFileBasename}` | File name of the query                 |
//! | `%r`  | `${resultCount}`       | `(N results)`, empty when unknown      |
//! | `%%`  |                        | A literal `%`                          |
//!
//! Unknown placeholders are left untouched.

use std::path::Path;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::item::{HistoryItem, RunPayload};
use crate::status::QueryStatus;

/// Default label format for new installations.
pub const DEFAULT_LABEL_FORMAT: &str = "%q on %d - %s %r [%t]";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%(.)|\$\{([^}]*)\}").expect("placeholder regex is valid"));

#[derive(Debug, Clone)]
pub struct LabelProvider {
    format: String,
}

impl Default for LabelProvider {
    fn default() -> Self {
        LabelProvider::new(DEFAULT_LABEL_FORMAT)
    }
}

impl LabelProvider {
    pub fn new(format: impl Into<String>) -> Self {
        LabelProvider {
            format: format.into(),
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn set_format(&mut self, format: impl Into<String>) {
        self.format = format.into();
    }

    /// Full label: the user's label when set, else the configured format.
    /// Either one is interpolated.
    pub fn label(&self, item: &HistoryItem) -> String {
        let template = item.user_specified_label().unwrap_or(&self.format);
        interpolate(template, item)
    }

    /// Compact label used where space is short (pickers, notifications).
    pub fn short_label(&self, item: &HistoryItem) -> String {
        if let Some(label) = item.user_specified_label() {
            return label.to_string();
        }
        match item.run() {
            RunPayload::Local(_) if item.status() != QueryStatus::Completed => {
                query_file_basename(item)
            }
            _ => item.query_name().to_string(),
        }
    }
}

fn interpolate(template: &str, item: &HistoryItem) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            replacement(key, item).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn replacement(key: &str, item: &HistoryItem) -> Option<String> {
    let value = match key {
        "t" | "startTime" => item
            .start_time()
            .with_timezone(&Local)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        "q" | "queryName" => display_query_name(item),
        "d" | "databaseName" => item.target_name(),
        "s" | "status" => display_status(item),
        "f" | "queryFileBasename" => query_file_basename(item),
        "r" | "resultCount" => display_result_count(item),
        "%" => "%".to_string(),
        _ => return None,
    };
    Some(value)
}

fn display_query_name(item: &HistoryItem) -> String {
    match item.run() {
        RunPayload::Local(run) => run.query_name.clone(),
        RunPayload::Remote(run) => format!("{} ({})", run.query_name, run.language),
        RunPayload::VariantAnalysis(run) => format!("{} ({})", run.query_name, run.language),
    }
}

fn display_status(item: &HistoryItem) -> String {
    match (item.run(), item.status()) {
        (_, QueryStatus::InProgress) => "in progress".to_string(),
        (_, QueryStatus::Failed) => item.failure_reason().unwrap_or("failed").to_string(),
        (RunPayload::Local(run), QueryStatus::Completed) => match run.evaluation_time_ms {
            Some(ms) => format!("finished in {} seconds", ms / 1000),
            None => "finished".to_string(),
        },
        (_, QueryStatus::Completed) => "completed".to_string(),
    }
}

fn display_result_count(item: &HistoryItem) -> String {
    match item.result_count() {
        Some(1) => "(1 result)".to_string(),
        Some(n) => format!("({} results)", n),
        None => String::new(),
    }
}

fn query_file_basename(item: &HistoryItem) -> String {
    let path = item.query_file_path();
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::test_support::*;

    #[test]
    fn test_user_label_wins_over_format() {
        let provider = LabelProvider::new("xxx %q xxx");
        let mut item = completed_local("a", "query-name", "db-name", 0, 456);
        assert_eq!(provider.label(&item), "xxx query-name xxx");
        item.set_user_specified_label(Some("user-specified-name".into()));
        assert_eq!(provider.label(&item), "user-specified-name");
    }

    #[test]
    fn test_short_and_long_placeholders_agree() {
        let item = completed_local("a", "query-name", "db-name", 0, 456);
        let short = LabelProvider::new("%q %d %s %f %r %%").label(&item);
        let long = LabelProvider::new(
            "${queryName} ${databaseName} ${status} ${queryFileBasename} ${resultCount} %",
        )
        .label(&item);
        assert_eq!(short, "query-name db-name finished query-name.ql (456 results) %");
        assert_eq!(short, long);
    }

    #[test]
    fn test_unknown_and_trailing_placeholders_are_kept() {
        let item = completed_local("a", "q", "db", 0, 1);
        let label = LabelProvider::new("%r %::${nope} %").label(&item);
        assert_eq!(label, "(1 result) %::${nope} %");
    }

    #[test]
    fn test_variant_analysis_label() {
        let mut item = variant_analysis("va", 1, "a-query-name", 0);
        let provider = LabelProvider::new("%q %d %s");
        assert_eq!(
            provider.label(&item),
            "a-query-name (javascript) 1/3 repositories in progress"
        );
        item.apply_status(QueryStatus::Completed, None, Some(16))
            .unwrap();
        assert_eq!(
            LabelProvider::new("%s %r").label(&item),
            "completed (16 results)"
        );
    }

    #[test]
    fn test_failed_status_shows_reason() {
        let mut item = local("a", "q", "db", 0);
        item.apply_status(QueryStatus::Failed, Some("Query cancelled".into()), None)
            .unwrap();
        assert_eq!(LabelProvider::new("%s").label(&item), "Query cancelled");
    }

    #[test]
    fn test_short_label_fallbacks() {
        let provider = LabelProvider::default();
        let running = local("a", "query-name", "db", 0);
        assert_eq!(provider.short_label(&running), "query-name.ql");
        let done = completed_local("b", "query-name", "db", 0, 1);
        assert_eq!(provider.short_label(&done), "query-name");
        let va = variant_analysis("va", 1, "a-query-name", 0);
        assert_eq!(provider.short_label(&va), "a-query-name");
    }
}
