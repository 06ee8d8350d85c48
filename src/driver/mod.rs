//! Run driver: drives one run from clone to a terminal state.
//!
//! The driver sequences the collaborators (source control, scanner, fixer,
//! test runner) and records every transition in the [`Registry`]:
//! - `CLONING` / `SCANNING`: fatal on failure
//! - `ANALYZING` / `FIXING` per issue: failures skip the issue
//! - `TESTING`: a passing cycle ends the loop, a failing one replaces the
//!   issue set from the failure output
//! - `PUSHING`: failures are logged, the run still passes
//!
//! Every run reaches exactly one terminal state and is finalized through
//! the registry, whichever path it takes.

mod error;
mod workspace;

pub use error::RunError;
pub(crate) use workspace::parse_dir_name;
#[cfg(test)]
pub(crate) use workspace::dir_name;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TimeoutConfig};
use crate::fixer::{self, FixProvider};
use crate::git::{GitCli, SourceControl};
use crate::registry::{
    CicdStatus, FinalData, FinalStatus, FixStatus, LogKind, NewFix, Registry, RunId, RunMetadata,
    Stage,
};
use crate::scanner::{Issue, IssueScanner, LintScanner};
use crate::testing::{CommandTestRunner, TestRunner};
use workspace::Workspace;

/// External capabilities a run is driven through.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub scm: Arc<dyn SourceControl>,
    pub scanner: Arc<dyn IssueScanner>,
    pub fixer: Arc<dyn FixProvider>,
    pub tests: Arc<dyn TestRunner>,
}

impl Collaborators {
    /// The command-line backed collaborators.
    pub fn from_config(config: &Config) -> Self {
        Self {
            scm: Arc::new(GitCli::new(config.git.clone())),
            scanner: Arc::new(LintScanner::new()),
            fixer: fixer::from_config(&config.fixer),
            tests: Arc::new(CommandTestRunner::new()),
        }
    }
}

/// Time budget of each collaborator step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepTimeouts {
    pub git: Duration,
    pub clone_repo: Duration,
    pub scan: Duration,
    pub fix: Duration,
    pub test: Duration,
}

impl From<&TimeoutConfig> for StepTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            git: config.git_timeout(),
            clone_repo: config.clone_timeout(),
            scan: config.scan_timeout(),
            fix: config.fix_timeout(),
            test: config.test_timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DriverSettings {
    /// Parent of the per-run working directories.
    pub workspace_root: PathBuf,
    pub keep_workspace: bool,
    /// Prepended to every commit message and the PR title.
    pub commit_prefix: String,
    pub timeouts: StepTimeouts,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace_root: config.workspace.root.clone(),
            keep_workspace: config.workspace.keep,
            commit_prefix: config.git.commit_prefix.clone(),
            timeouts: StepTimeouts::from(&config.timeouts),
        }
    }
}

/// How the fix loop ended.
#[derive(Debug, Clone, Copy)]
struct LoopOutcome {
    passed: bool,
    iterations: u32,
}

enum TestCycle {
    Passed,
    Failed(Vec<String>),
}

/// Collapses a step result into a per-issue outcome: collaborator errors
/// and timeouts become the failure message, cancellation still propagates.
fn soft<T>(outcome: Result<anyhow::Result<T>, RunError>) -> Result<Result<T, String>, RunError> {
    match outcome {
        Ok(Ok(value)) => Ok(Ok(value)),
        Ok(Err(e)) => Ok(Err(format!("{e:#}"))),
        Err(e) if e.is_timeout() => Ok(Err(e.to_string())),
        Err(e) => Err(e),
    }
}

fn is_auth_failure(message: &str) -> bool {
    message.contains("could not read Username") || message.to_lowercase().contains("authentication")
}

/// Drives a single run. The run must already be registered.
pub(crate) struct RunDriver {
    run_id: RunId,
    meta: RunMetadata,
    registry: Registry,
    collab: Collaborators,
    settings: DriverSettings,
    cancel: CancellationToken,
}

impl RunDriver {
    pub fn new(
        run_id: RunId,
        meta: RunMetadata,
        registry: Registry,
        collab: Collaborators,
        settings: DriverSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            meta,
            registry,
            collab,
            settings,
            cancel,
        }
    }

    /// Runs to completion and returns the final status. The run is
    /// finalized and its working directory released before this returns.
    pub async fn run(self) -> FinalStatus {
        let start = Instant::now();
        info!(
            event = "run_start",
            run_id = %self.run_id,
            repo = %self.meta.repo_url,
            branch = %self.meta.branch_name,
            retry_limit = self.meta.retry_limit,
            "run started"
        );

        let mut workspace = None;
        let final_status = match self.execute(&mut workspace).await {
            Ok(outcome) => match self.finish(outcome, start).await {
                Ok(status) => status,
                Err(e) => self.fail(e).await,
            },
            Err(e) => self.fail(e).await,
        };

        if let Some(workspace) = workspace {
            workspace.release().await;
        }

        info!(
            event = "run_end",
            run_id = %self.run_id,
            %final_status,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "run finished"
        );
        final_status
    }

    async fn execute(&self, workspace: &mut Option<Workspace>) -> Result<LoopOutcome, RunError> {
        let timeouts = self.settings.timeouts;
        let scm = &self.collab.scm;
        let branch = &self.meta.branch_name;

        if let Err(e) = self
            .guarded("git check", timeouts.git, scm.check_available())
            .await?
        {
            return Err(RunError::ToolUnavailable(format!("{e:#}")));
        }

        self.stage(Stage::Cloning, 0)?;
        self.log(format!("git clone {}", self.meta.repo_url), LogKind::Command)?;
        self.log("Cloning repository...", LogKind::Info)?;

        let root = workspace
            .insert(
                Workspace::create(
                    &self.settings.workspace_root,
                    self.run_id,
                    self.settings.keep_workspace,
                )
                .await?,
            )
            .path()
            .to_path_buf();

        let repo = self
            .guarded("clone", timeouts.clone_repo, scm.clone_repo(&self.meta.repo_url, &root))
            .await?
            .map_err(RunError::Clone)?;
        self.log("Repository cloned successfully", LogKind::Success)?;

        self.log(format!("git checkout -b {branch}"), LogKind::Command)?;
        self.guarded("branch", timeouts.git, scm.create_branch(&repo, branch))
            .await?
            .map_err(RunError::Branch)?;
        self.log(format!("Switched to new branch '{branch}'"), LogKind::Success)?;

        self.stage(Stage::Scanning, 0)?;
        self.log("Initializing static code analysis...", LogKind::Info)?;
        let mut issues = self
            .guarded("scan", timeouts.scan, self.collab.scanner.scan(&repo))
            .await?
            .map_err(RunError::Scan)?;
        self.log(format!("Found {} issues to fix", issues.len()), LogKind::Info)?;

        let retry_limit = self.meta.retry_limit;
        let mut iteration = 0;
        let mut passed = false;

        while iteration < retry_limit && !passed {
            self.check_cancelled()?;
            iteration += 1;
            info!(
                event = "iteration_start",
                run_id = %self.run_id,
                iteration,
                issues = issues.len(),
                "iteration started"
            );
            self.log(
                format!("Starting iteration {iteration}/{retry_limit}"),
                LogKind::Info,
            )?;

            for issue in &issues {
                self.fix_issue(issue, &repo, iteration).await?;
            }

            match self.test_cycle(&repo, iteration).await? {
                TestCycle::Passed => {
                    passed = true;
                    self.publish(&repo).await?;
                }
                TestCycle::Failed(failures) => {
                    // The next iteration works on the failures only.
                    issues = self
                        .guarded(
                            "reanalyze",
                            timeouts.scan,
                            self.collab.scanner.reanalyze_failures(&failures, &repo),
                        )
                        .await?
                        .map_err(RunError::Scan)?;
                }
            }
        }

        Ok(LoopOutcome {
            passed,
            iterations: iteration,
        })
    }

    /// Attempts one issue. Only cancellation and registry errors escape.
    async fn fix_issue(&self, issue: &Issue, repo: &Path, iteration: u32) -> Result<(), RunError> {
        let timeouts = self.settings.timeouts;
        let fixer = &self.collab.fixer;

        self.check_cancelled()?;
        self.stage(Stage::Analyzing, iteration)?;
        self.log(format!("Vulnerability detected in {}", issue.file), LogKind::Error)?;
        self.log("AI Agent analyzing context window...", LogKind::Info)?;

        self.stage(Stage::Fixing, iteration)?;
        self.log(
            format!("Generating patch with {}...", fixer.name()),
            LogKind::Info,
        )?;

        let proposal = match soft(
            self.guarded("fix", timeouts.fix, fixer.propose_fix(issue, repo))
                .await,
        )? {
            Ok(proposal) => proposal,
            Err(message) => {
                warn!(run_id = %self.run_id, file = %issue.file, "fix generation failed: {}", message);
                self.log(
                    format!("Fix generation failed for {}: {message}", issue.file),
                    LogKind::Error,
                )?;
                return Ok(());
            }
        };

        self.log("Applying patch...", LogKind::Info)?;
        if let Err(message) = soft(
            self.guarded("apply fix", timeouts.fix, fixer.apply_fix(&proposal, repo))
                .await,
        )? {
            self.log(
                format!("Failed to apply patch to {}: {message}", issue.file),
                LogKind::Error,
            )?;
            return Ok(());
        }

        let fix_id = self.registry.record_fix(
            self.run_id,
            NewFix {
                file: issue.file.clone(),
                line: issue.line,
                bug_type: issue.bug_type,
                description: issue.description.clone(),
                commit_message: proposal.commit_message.clone(),
                severity: issue.severity,
            },
        )?;

        let message = format!("{} {}", self.settings.commit_prefix, proposal.commit_message);
        self.log(format!("git commit -m \"{message}\""), LogKind::Command)?;
        match soft(
            self.guarded("commit", timeouts.git, self.collab.scm.commit(repo, &message))
                .await,
        )? {
            Ok(true) => {}
            Ok(false) => debug!(run_id = %self.run_id, %fix_id, "nothing to commit"),
            Err(error) => {
                self.log(format!("Commit failed: {error}"), LogKind::Error)?;
                self.registry
                    .set_fix_status(self.run_id, &fix_id, FixStatus::Failed)?;
            }
        }
        Ok(())
    }

    /// Runs the test suite under a CI record.
    async fn test_cycle(&self, repo: &Path, iteration: u32) -> Result<TestCycle, RunError> {
        self.stage(Stage::Testing, iteration)?;
        self.log("Running test suite...", LogKind::Command)?;

        let cicd_id = self
            .registry
            .start_cicd_run(self.run_id, CicdStatus::Running)?;
        let started = Instant::now();

        let outcome = match self
            .guarded(
                "tests",
                self.settings.timeouts.test,
                self.collab.tests.run_tests(repo),
            )
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.registry.finish_cicd_run(
                    self.run_id,
                    cicd_id,
                    CicdStatus::Failed,
                    started.elapsed(),
                )?;
                return Err(RunError::Tests(e));
            }
            Err(e) => {
                self.registry.finish_cicd_run(
                    self.run_id,
                    cicd_id,
                    CicdStatus::Failed,
                    started.elapsed(),
                )?;
                return Err(e);
            }
        };

        if outcome.passed {
            self.registry.finish_cicd_run(
                self.run_id,
                cicd_id,
                CicdStatus::Passed,
                outcome.duration,
            )?;
            self.log("Tests passed. Verifying fix...", LogKind::Success)?;
            let promoted = self
                .registry
                .set_all_in_progress_fixes(self.run_id, FixStatus::Fixed)?;
            debug!(run_id = %self.run_id, promoted, "fixes promoted");
            Ok(TestCycle::Passed)
        } else {
            self.registry.finish_cicd_run(
                self.run_id,
                cicd_id,
                CicdStatus::Failed,
                outcome.duration,
            )?;
            self.log(
                format!("Tests failed: {} failures", outcome.failures.len()),
                LogKind::Error,
            )?;
            Ok(TestCycle::Failed(outcome.failures))
        }
    }

    /// Pushes the branch and opens a pull request. Failures here leave the
    /// run passing and flag a manual push.
    async fn publish(&self, repo: &Path) -> Result<(), RunError> {
        let git = self.settings.timeouts.git;
        let branch = &self.meta.branch_name;

        self.stage(Stage::Pushing, 0)?;
        self.log(format!("git push origin {branch}"), LogKind::Command)?;

        let published = match soft(
            self.guarded("push", git, self.collab.scm.push(repo, branch))
                .await,
        )? {
            Ok(()) => {
                self.log("Creating Pull Request...", LogKind::Info)?;
                let title = format!(
                    "{} Fix Critical Issues - {}",
                    self.settings.commit_prefix, self.meta.team_name
                );
                let body = format!("Automated fixes by {}'s AI Agent", self.meta.team_leader);
                soft(
                    self.guarded(
                        "pull request",
                        git,
                        self.collab.scm.open_pull_request(repo, branch, &title, &body),
                    )
                    .await,
                )?
            }
            Err(e) => Err(e),
        };

        match published {
            Ok(url) => {
                self.log(format!("PR Created: {url}"), LogKind::Success)?;
                self.registry.record_publish(self.run_id, Some(url), false)?;
            }
            Err(message) => {
                warn!(run_id = %self.run_id, "publish failed: {}", message);
                if is_auth_failure(&message) {
                    self.log("Push failed: GitHub token not configured", LogKind::Error)?;
                    self.log(
                        "Configure a GitHub token (GITHUB_TOKEN or a git credential helper) to enable automatic push",
                        LogKind::Info,
                    )?;
                } else {
                    self.log(format!("Push failed: {message}"), LogKind::Error)?;
                }
                self.log(
                    format!("Manual push required: git push origin {branch}"),
                    LogKind::Info,
                )?;
                self.registry.record_publish(self.run_id, None, true)?;
            }
        }
        Ok(())
    }

    async fn finish(&self, outcome: LoopOutcome, start: Instant) -> Result<FinalStatus, RunError> {
        let (final_status, stage, kind) = if outcome.passed {
            (FinalStatus::Passed, Stage::Completed, LogKind::Success)
        } else {
            (FinalStatus::Failed, Stage::Failed, LogKind::Error)
        };

        self.stage(stage, outcome.iterations)?;
        self.log(
            format!("Agent execution completed. Final status: {final_status}"),
            kind,
        )?;

        let data = FinalData::finished(
            final_status,
            start.elapsed().as_secs_f64(),
            outcome.iterations,
        );
        if let Err(e) = self.registry.finalize_run(self.run_id, data).await {
            error!(run_id = %self.run_id, error = %e, "failed to finalize run");
        }
        Ok(final_status)
    }

    async fn fail(&self, err: RunError) -> FinalStatus {
        let message = err.to_string();
        error!(event = "run_error", run_id = %self.run_id, error = %message, "run failed");

        let trail = self
            .log(format!("Fatal error: {message}"), LogKind::Error)
            .and_then(|()| self.stage(Stage::Error, 0))
            .and_then(|()| {
                self.log(
                    format!("Agent execution completed. Final status: {}", FinalStatus::Error),
                    LogKind::Error,
                )
            });
        if let Err(e) = trail {
            warn!(run_id = %self.run_id, error = %e, "could not record error trail");
        }

        if let Err(e) = self
            .registry
            .finalize_run(self.run_id, FinalData::error(message))
            .await
        {
            error!(run_id = %self.run_id, error = %e, "failed to finalize run");
        }
        FinalStatus::Error
    }

    /// Runs a collaborator step under its time budget, racing cancellation.
    ///
    /// The outer error is a timeout or cancellation; the inner result is
    /// the collaborator's own.
    async fn guarded<T>(
        &self,
        step: &'static str,
        limit: Duration,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<anyhow::Result<T>, RunError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RunError::Cancelled),
            result = tokio::time::timeout(limit, fut) => result.map_err(|_| {
                warn!(run_id = %self.run_id, step, secs = limit.as_secs_f64(), "step timed out");
                RunError::timeout(step, limit)
            }),
        }
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    fn log(&self, message: impl Into<String>, kind: LogKind) -> Result<(), RunError> {
        self.registry.append_log(self.run_id, message, kind)?;
        Ok(())
    }

    fn stage(&self, stage: Stage, iteration: u32) -> Result<(), RunError> {
        self.registry
            .set_stage(self.run_id, stage, stage.progress(iteration))?;
        debug!(run_id = %self.run_id, ?stage, iteration, "stage changed");
        Ok(())
    }
}
