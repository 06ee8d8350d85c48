//! Run supervisor: the boundary between callers and running drivers.
//!
//! Validates requests, registers runs, spawns one driver task per run and
//! answers point-in-time queries against the registry. Each driver task is
//! watched so that a panicking driver still leaves a finalized `ERROR` run.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::{Config, RunsConfig};
use crate::driver::{Collaborators, DriverSettings, RunDriver};
use crate::notifications::{NotificationDetails, NotificationEvent, Notifier};
use crate::registry::{
    CicdRun, FinalData, FinalStatus, FixRecord, LogEntry, LogKind, Registry, RegistryError,
    RunId, RunMetadata, RunResult, RunStatusView, RunSummary, SnapshotStore, Stage,
};

/// Errors returned to callers of the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No run with this identifier exists.
    #[error("Run ID not found")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SupervisorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A request to start a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RunRequest {
    pub repo_url: String,
    pub team_name: String,
    pub team_leader: String,
    #[serde(default)]
    pub retry_limit: Option<u32>,
}

/// A started run. Dropping `completion` detaches the run.
#[derive(Debug)]
pub(crate) struct RunHandle {
    pub run_id: RunId,
    pub branch_name: String,
    /// Resolves once the run is finalized and notifications are sent.
    pub completion: JoinHandle<FinalStatus>,
}

/// Working branch for a team: `{TEAM}_{LEADER}_AI_Fix`.
pub(crate) fn branch_name(team_name: &str, team_leader: &str) -> String {
    let normalize = |s: &str| s.trim().to_uppercase().replace(' ', "_");
    format!("{}_{}_AI_Fix", normalize(team_name), normalize(team_leader))
}

struct Inner {
    registry: Registry,
    collab: Collaborators,
    settings: DriverSettings,
    runs: RunsConfig,
    notifier: Notifier,
    active: DashMap<RunId, CancellationToken>,
    /// Run watchers; each ends after its run is finalized and notified.
    tasks: TaskTracker,
}

/// Starts runs and serves queries. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        registry: Registry,
        collab: Collaborators,
        settings: DriverSettings,
        runs: RunsConfig,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                collab,
                settings,
                runs,
                notifier,
                active: DashMap::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// A supervisor over the command-line collaborators.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Registry::new(SnapshotStore::new(config.results.dir.clone())),
            Collaborators::from_config(config),
            DriverSettings::from_config(config),
            config.runs.clone(),
            Notifier::new(config.notifications.clone()),
        )
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn validate(&self, request: &RunRequest) -> Result<u32, SupervisorError> {
        for (field, value) in [
            ("repo_url", &request.repo_url),
            ("team_name", &request.team_name),
            ("team_leader", &request.team_leader),
        ] {
            if value.trim().is_empty() {
                return Err(SupervisorError::InvalidRequest(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let max = self.inner.runs.max_retry_limit;
        let retry_limit = request
            .retry_limit
            .unwrap_or(self.inner.runs.default_retry_limit);
        if retry_limit == 0 || retry_limit > max {
            return Err(SupervisorError::InvalidRequest(format!(
                "retry_limit must be between 1 and {max}"
            )));
        }
        Ok(retry_limit)
    }

    /// Registers a run and starts its driver without waiting for it.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, SupervisorError> {
        let retry_limit = self.validate(&request)?;

        let run_id = RunId::new();
        let branch = branch_name(&request.team_name, &request.team_leader);
        let meta = RunMetadata {
            repo_url: request.repo_url.trim().to_string(),
            team_name: request.team_name.trim().to_string(),
            team_leader: request.team_leader.trim().to_string(),
            branch_name: branch.clone(),
            retry_limit,
            start_time: Utc::now(),
        };
        self.inner.registry.create_run(run_id, meta.clone())?;

        let cancel = CancellationToken::new();
        self.inner.active.insert(run_id, cancel.clone());

        let driver = RunDriver::new(
            run_id,
            meta,
            self.inner.registry.clone(),
            self.inner.collab.clone(),
            self.inner.settings.clone(),
            cancel,
        );
        let task = tokio::spawn(driver.run());

        let this = self.clone();
        let completion = self
            .inner
            .tasks
            .spawn(async move { this.watch(run_id, task).await });

        info!(%run_id, branch = %branch, retry_limit, "run scheduled");
        Ok(RunHandle {
            run_id,
            branch_name: branch,
            completion,
        })
    }

    /// Awaits a driver task, finalizing the run if the task died.
    async fn watch(self, run_id: RunId, task: JoinHandle<FinalStatus>) -> FinalStatus {
        let final_status = match task.await {
            Ok(status) => {
                // Writes the snapshot again if the driver's write failed.
                let retry = FinalData::error("run ended without finalizing");
                if let Err(e) = self.inner.registry.finalize_run(run_id, retry).await {
                    error!(%run_id, error = %e, "run snapshot could not be persisted");
                }
                status
            }
            Err(e) => {
                let message = if e.is_panic() {
                    "driver panicked"
                } else {
                    "driver task aborted"
                };
                error!(event = "run_panic", %run_id, error = %e, "{}", message);
                self.abandon(run_id, message).await;
                FinalStatus::Error
            }
        };

        self.inner.active.remove(&run_id);
        self.notify(run_id).await;
        final_status
    }

    async fn abandon(&self, run_id: RunId, message: &str) {
        let registry = &self.inner.registry;
        let trail = registry
            .append_log(run_id, format!("Fatal error: {message}"), LogKind::Error)
            .and_then(|_| registry.set_stage(run_id, Stage::Error, 0));
        if let Err(e) = trail {
            warn!(%run_id, error = %e, "could not record error trail");
        }
        if let Err(e) = registry.finalize_run(run_id, FinalData::error(message)).await {
            error!(%run_id, error = %e, "failed to finalize abandoned run");
        }
    }

    async fn notify(&self, run_id: RunId) {
        let Some(view) = self.inner.registry.get_status(run_id) else {
            return;
        };
        let Some(final_status) = view.final_status else {
            return;
        };
        let error = self
            .inner
            .registry
            .get_full_result(run_id)
            .and_then(|result| result.error);
        let details = NotificationDetails::finalized(&view, error.as_deref());
        self.inner
            .notifier
            .notify(NotificationEvent::for_status(final_status), &details)
            .await;
    }

    /// Requests cancellation. Returns `false` if the run already finished.
    pub fn cancel(&self, run_id: RunId) -> Result<bool, SupervisorError> {
        if !self.inner.registry.contains(run_id) {
            return Err(SupervisorError::NotFound(run_id.to_string()));
        }
        match self.inner.active.get(&run_id) {
            Some(token) => {
                info!(%run_id, "cancellation requested");
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancels every active run.
    pub fn cancel_all(&self) {
        for entry in &self.inner.active {
            entry.value().cancel();
        }
    }

    /// Cancels every active run and waits up to `grace` for all runs to
    /// be finalized. Returns `false` if some were still finishing.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel_all();
        self.inner.tasks.close();
        tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_ok()
    }

    /// Number of runs whose driver has not finished yet.
    pub fn active_runs(&self) -> usize {
        self.inner.active.len()
    }

    /// Parses a run identifier; malformed identifiers are unknown runs.
    pub fn parse_run_id(raw: &str) -> Result<RunId, SupervisorError> {
        raw.parse()
            .map_err(|_| SupervisorError::NotFound(raw.to_string()))
    }

    pub fn status(&self, run_id: RunId) -> Result<RunStatusView, SupervisorError> {
        self.inner
            .registry
            .get_status(run_id)
            .ok_or_else(|| SupervisorError::NotFound(run_id.to_string()))
    }

    /// The most recent `limit` log entries (default from config).
    pub fn logs(&self, run_id: RunId, limit: Option<usize>) -> Result<Vec<LogEntry>, SupervisorError> {
        let limit = limit.unwrap_or(self.inner.runs.log_limit_default);
        self.inner
            .registry
            .get_logs(run_id, limit)
            .ok_or_else(|| SupervisorError::NotFound(run_id.to_string()))
    }

    pub fn fixes(&self, run_id: RunId) -> Result<Vec<FixRecord>, SupervisorError> {
        self.inner
            .registry
            .get_fixes(run_id)
            .ok_or_else(|| SupervisorError::NotFound(run_id.to_string()))
    }

    pub fn cicd_runs(&self, run_id: RunId) -> Result<Vec<CicdRun>, SupervisorError> {
        self.inner
            .registry
            .get_cicd_runs(run_id)
            .ok_or_else(|| SupervisorError::NotFound(run_id.to_string()))
    }

    /// Full result, from memory or from the persisted snapshot.
    pub async fn result(&self, run_id: RunId) -> Result<RunResult, SupervisorError> {
        self.inner
            .registry
            .load_result(run_id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(run_id.to_string()))
    }

    pub fn list(&self) -> Vec<RunSummary> {
        self.inner.registry.list_runs()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::driver::StepTimeouts;
    use crate::mock::{issue, MockFixer, MockScanner, MockSourceControl, MockTestRunner};
    use crate::registry::RunStatus;
    use crate::scanner::{Issue, IssueScanner};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct PanickingScanner;

    #[async_trait]
    impl IssueScanner for PanickingScanner {
        async fn scan(&self, _workdir: &Path) -> Result<Vec<Issue>> {
            panic!("scanner exploded");
        }

        async fn reanalyze_failures(&self, _failures: &[String], _workdir: &Path) -> Result<Vec<Issue>> {
            Ok(Vec::new())
        }
    }

    fn settings(dir: &TempDir) -> DriverSettings {
        DriverSettings {
            workspace_root: dir.path().join("work"),
            keep_workspace: false,
            commit_prefix: "[AI-AGENT]".to_string(),
            timeouts: StepTimeouts {
                git: Duration::from_secs(5),
                clone_repo: Duration::from_secs(5),
                scan: Duration::from_secs(5),
                fix: Duration::from_secs(5),
                test: Duration::from_secs(5),
            },
        }
    }

    /// A supervisor over mock collaborators.
    pub(crate) fn mock_supervisor(dir: &TempDir, scm: MockSourceControl, tests: MockTestRunner) -> Supervisor {
        let collab = Collaborators {
            scm: Arc::new(scm),
            scanner: Arc::new(MockScanner::new(vec![issue("src/app.js")])),
            fixer: Arc::new(MockFixer::always_succeed()),
            tests: Arc::new(tests),
        };
        Supervisor::new(
            Registry::new(SnapshotStore::new(dir.path().join("results"))),
            collab,
            settings(dir),
            RunsConfig::default(),
            Notifier::new(NotificationConfig::default()),
        )
    }

    fn request() -> RunRequest {
        RunRequest {
            repo_url: "https://github.com/acme/widgets".to_string(),
            team_name: "Code Warriors".to_string(),
            team_leader: "Jo Smith".to_string(),
            retry_limit: None,
        }
    }

    #[test]
    fn test_branch_name() {
        assert_eq!(
            branch_name("Code Warriors", "Jo Smith"),
            "CODE_WARRIORS_JO_SMITH_AI_Fix"
        );
        assert_eq!(branch_name(" rift ", "ann"), "RIFT_ANN_AI_Fix");
    }

    #[test]
    fn test_parse_run_id() {
        let run_id = RunId::new();
        assert_eq!(Supervisor::parse_run_id(&run_id.to_string()).unwrap(), run_id);
        assert!(Supervisor::parse_run_id("nope").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let dir = tempdir().unwrap();
        let supervisor = mock_supervisor(&dir, MockSourceControl::new(), MockTestRunner::always_pass());

        let handle = supervisor.start(request()).unwrap();
        assert_eq!(handle.branch_name, "CODE_WARRIORS_JO_SMITH_AI_Fix");
        assert_eq!(handle.completion.await.unwrap(), FinalStatus::Passed);

        let status = supervisor.status(handle.run_id).unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert_eq!(status.final_status, Some(FinalStatus::Passed));
        assert_eq!(supervisor.fixes(handle.run_id).unwrap().len(), 1);
        assert_eq!(supervisor.cicd_runs(handle.run_id).unwrap().len(), 1);
        assert_eq!(supervisor.logs(handle.run_id, Some(1)).unwrap().len(), 1);
        assert_eq!(supervisor.list().len(), 1);
        assert_eq!(supervisor.active_runs(), 0);
        assert!(!supervisor.cancel(handle.run_id).unwrap());

        let result = supervisor.result(handle.run_id).await.unwrap();
        assert_eq!(result.retry_limit, 5);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_requests() {
        let dir = tempdir().unwrap();
        let supervisor = mock_supervisor(&dir, MockSourceControl::new(), MockTestRunner::always_pass());

        let mut empty = request();
        empty.team_name = "  ".to_string();
        assert!(matches!(
            supervisor.start(empty),
            Err(SupervisorError::InvalidRequest(_))
        ));

        let mut zero = request();
        zero.retry_limit = Some(0);
        assert!(supervisor.start(zero).is_err());

        let mut huge = request();
        huge.retry_limit = Some(21);
        assert!(supervisor.start(huge).is_err());
        assert!(supervisor.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run_queries_are_not_found() {
        let dir = tempdir().unwrap();
        let supervisor = mock_supervisor(&dir, MockSourceControl::new(), MockTestRunner::always_pass());
        let run_id = RunId::new();

        assert!(supervisor.status(run_id).unwrap_err().is_not_found());
        assert!(supervisor.logs(run_id, None).unwrap_err().is_not_found());
        assert!(supervisor.fixes(run_id).unwrap_err().is_not_found());
        assert!(supervisor.cicd_runs(run_id).unwrap_err().is_not_found());
        assert!(supervisor.result(run_id).await.unwrap_err().is_not_found());
        assert!(supervisor.cancel(run_id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_active_run() {
        let dir = tempdir().unwrap();
        let supervisor = mock_supervisor(
            &dir,
            MockSourceControl::new().hanging_clone(),
            MockTestRunner::always_pass(),
        );

        let handle = supervisor.start(request()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.cancel(handle.run_id).unwrap());
        assert_eq!(handle.completion.await.unwrap(), FinalStatus::Error);

        let result = supervisor.result(handle.run_id).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cancelled_runs() {
        let dir = tempdir().unwrap();
        let supervisor = mock_supervisor(
            &dir,
            MockSourceControl::new().hanging_clone(),
            MockTestRunner::always_pass(),
        );

        let first = supervisor.start(request()).unwrap();
        let second = supervisor.start(request()).unwrap();
        assert_eq!(supervisor.active_runs(), 2);

        assert!(supervisor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(supervisor.active_runs(), 0);
        for run_id in [first.run_id, second.run_id] {
            let result = supervisor.result(run_id).await.unwrap();
            assert_eq!(result.final_status, Some(FinalStatus::Error));
            assert_eq!(result.error.as_deref(), Some("cancelled"));
            assert!(supervisor.registry().store().path_for(run_id).exists());
        }
    }

    #[tokio::test]
    async fn test_panicking_driver_is_finalized_error() {
        let dir = tempdir().unwrap();
        let collab = Collaborators {
            scm: Arc::new(MockSourceControl::new()),
            scanner: Arc::new(PanickingScanner),
            fixer: Arc::new(MockFixer::always_succeed()),
            tests: Arc::new(MockTestRunner::always_pass()),
        };
        let supervisor = Supervisor::new(
            Registry::new(SnapshotStore::new(dir.path().join("results"))),
            collab,
            settings(&dir),
            RunsConfig::default(),
            Notifier::new(NotificationConfig::default()),
        );

        let handle = supervisor.start(request()).unwrap();
        assert_eq!(handle.completion.await.unwrap(), FinalStatus::Error);

        let status = supervisor.status(handle.run_id).unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert_eq!(status.stage, Stage::Error);
        let result = supervisor.result(handle.run_id).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("driver panicked"));
        assert!(supervisor
            .registry()
            .store()
            .path_for(handle.run_id)
            .exists());
    }
}
