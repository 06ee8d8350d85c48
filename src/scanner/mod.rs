//! Issue detection for cloned repositories.
//!
//! The driver only sees the [`IssueScanner`] trait; the bundled
//! [`LintScanner`] shells out to common linters and adds a few generic
//! pattern checks.

mod lint;

pub(crate) use lint::LintScanner;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::registry::{BugType, Severity};

/// A detected code problem. Lives for one iteration of the fix loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Issue {
    /// Path of the offending file, or `"unknown"` when not attributable.
    pub file: String,
    /// 1-based line number, 0 when not attributable.
    pub line: u32,
    pub bug_type: BugType,
    pub description: String,
    pub severity: Severity,
}

impl Issue {
    /// An issue derived from a failing test rather than from a linter.
    pub fn from_test_failure(failure: &str) -> Self {
        Self {
            file: "unknown".to_string(),
            line: 0,
            bug_type: BugType::Logic,
            description: failure.to_string(),
            severity: Severity::High,
        }
    }
}

/// Trait for issue detection backends.
#[async_trait]
pub(crate) trait IssueScanner: Send + Sync {
    /// Scans a working directory and returns the current issue set.
    async fn scan(&self, workdir: &Path) -> Result<Vec<Issue>>;

    /// Turns test failure messages into a fresh issue set.
    async fn reanalyze_failures(&self, failures: &[String], workdir: &Path) -> Result<Vec<Issue>>;
}
