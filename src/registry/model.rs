//! Data types shared between the run registry, the driver and observers.
//!
//! Everything here is serializable so that status projections and the
//! finalized snapshot can be handed straight to JSON consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Allocates a fresh random run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle phase of a run. Drives the reported progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Idle,
    Cloning,
    Scanning,
    Analyzing,
    Fixing,
    Testing,
    Pushing,
    Completed,
    Failed,
    Error,
}

impl Stage {
    /// Progress floor for this stage at the given 1-based iteration.
    ///
    /// Iteration-scaled stages are clamped to 100.
    pub fn progress(self, iteration: u32) -> u8 {
        let step = iteration.saturating_mul(10);
        let value = match self {
            Self::Idle | Self::Error => 0,
            Self::Cloning => 10,
            Self::Scanning => 20,
            Self::Analyzing => 30u32.saturating_add(step),
            Self::Fixing => 40u32.saturating_add(step),
            Self::Testing => 60u32.saturating_add(step),
            Self::Pushing => 90,
            Self::Completed | Self::Failed => 100,
        };
        u8::try_from(value.min(100)).unwrap_or(100)
    }

    /// Returns true for the three terminal stages.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }
}

/// Coarse run status: running until finalized, then completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
}

/// Terminal verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    /// A test cycle passed within the retry bound.
    Passed,
    /// The retry bound was exhausted without a passing test cycle.
    Failed,
    /// Infrastructure failure, cancellation or a crashed driver.
    Error,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Category of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Command,
    Success,
    Error,
}

/// One append-only entry of a run's log trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

/// Classification of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugType {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
    Security,
    Performance,
    Deprecation,
}

impl fmt::Display for BugType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linting => "LINTING",
            Self::Syntax => "SYNTAX",
            Self::Logic => "LOGIC",
            Self::TypeError => "TYPE_ERROR",
            Self::Import => "IMPORT",
            Self::Indentation => "INDENTATION",
            Self::Security => "SECURITY",
            Self::Performance => "PERFORMANCE",
            Self::Deprecation => "DEPRECATION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Fix status. Transitions only move forward out of `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    InProgress,
    Fixed,
    Failed,
}

/// Input for [`Registry::record_fix`](super::Registry::record_fix).
#[derive(Debug, Clone, PartialEq)]
pub struct NewFix {
    pub file: String,
    pub line: u32,
    pub bug_type: BugType,
    pub description: String,
    pub commit_message: String,
    pub severity: Severity,
}

/// A fix the driver attempted for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub file: String,
    pub line: u32,
    pub bug_type: BugType,
    pub description: String,
    pub commit_message: String,
    pub severity: Severity,
    pub status: FixStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CicdStatus {
    Running,
    Passed,
    Failed,
}

/// One test-execution attempt within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CicdRun {
    pub id: u64,
    pub status: CicdStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_bugs: u32,
    pub fixed_bugs: u32,
    pub failed_fixes: u32,
}

/// Immutable facts about a run, registered when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    pub retry_limit: u32,
    pub start_time: DateTime<Utc>,
}

/// Terminal data merged into a run on finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalData {
    pub final_status: FinalStatus,
    pub end_time: DateTime<Utc>,
    pub total_time_secs: Option<f64>,
    pub iterations_used: Option<u32>,
    pub error: Option<String>,
}

impl FinalData {
    /// Final data for a run that ran its loop to the end.
    pub fn finished(final_status: FinalStatus, total_time_secs: f64, iterations_used: u32) -> Self {
        Self {
            final_status,
            end_time: Utc::now(),
            total_time_secs: Some(total_time_secs),
            iterations_used: Some(iterations_used),
            error: None,
        }
    }

    /// Final data for a run that terminated on an error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            final_status: FinalStatus::Error,
            end_time: Utc::now(),
            total_time_secs: None,
            iterations_used: None,
            error: Some(message.into()),
        }
    }
}

/// Point-in-time status projection of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub run_id: RunId,
    pub status: RunStatus,
    pub stage: Stage,
    pub progress: u8,
    pub stats: RunStats,
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    pub final_status: Option<FinalStatus>,
    pub iterations_used: Option<u32>,
    pub pr_url: Option<String>,
    pub manual_push_required: bool,
}

/// One line of the run listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub repo_url: String,
    pub branch_name: String,
    pub status: RunStatus,
    pub stage: Stage,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub final_status: Option<FinalStatus>,
}

/// Complete record of a run. This is also the persisted snapshot format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    pub branch_name: String,
    pub retry_limit: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_secs: Option<f64>,
    pub iterations_used: Option<u32>,
    pub final_status: Option<FinalStatus>,
    pub error: Option<String>,
    pub pr_url: Option<String>,
    pub manual_push_required: bool,
    pub stats: RunStats,
    pub fixes: Vec<FixRecord>,
    pub cicd_runs: Vec<CicdRun>,
    pub logs: Vec<LogEntry>,
}

/// Live change notifications published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    LogAppended { run_id: RunId, entry: LogEntry },
    StageChanged { run_id: RunId, stage: Stage, progress: u8 },
    Finalized { run_id: RunId, final_status: FinalStatus },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> RunId {
        match self {
            Self::LogAppended { run_id, .. }
            | Self::StageChanged { run_id, .. }
            | Self::Finalized { run_id, .. } => *run_id,
        }
    }
}
