//! Scripted collaborators for driver and supervisor tests.
//!
//! Each mock returns configurable responses and tracks invocations for
//! test assertions. Scripts cycle when invoked more often than they have
//! entries.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::fixer::{FixProposal, FixProvider};
use crate::git::SourceControl;
use crate::registry::{BugType, Severity};
use crate::scanner::{Issue, IssueScanner};
use crate::testing::{TestOutcome, TestRunner};

/// Long enough to trip any step timeout used in tests.
const HANG: Duration = Duration::from_secs(3600);

fn next<'a, T>(script: &'a [T], counter: &AtomicUsize) -> (usize, &'a T) {
    let count = counter.fetch_add(1, Ordering::SeqCst);
    (count, &script[count % script.len()])
}

/// Builds an issue pointing at `file`.
pub(crate) fn issue(file: &str) -> Issue {
    Issue {
        file: file.to_string(),
        line: 1,
        bug_type: BugType::Syntax,
        description: "Possible missing semicolon".to_string(),
        severity: Severity::Low,
    }
}

// -----------------------------------------------------------------------------
// Source control
// -----------------------------------------------------------------------------

/// Mock source control. Clones create an empty `repo` directory.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockSourceControl {
    unavailable: bool,
    clone_error: Option<String>,
    hang_clone: bool,
    branch_error: Option<String>,
    commit_error: Option<String>,
    no_changes: bool,
    push_error: Option<String>,
    pr_error: Option<String>,
    commits: Arc<Mutex<Vec<String>>>,
    push_count: Arc<AtomicUsize>,
    pr_count: Arc<AtomicUsize>,
}

impl MockSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn failing_clone(mut self, error: &str) -> Self {
        self.clone_error = Some(error.to_string());
        self
    }

    pub fn hanging_clone(mut self) -> Self {
        self.hang_clone = true;
        self
    }

    pub fn failing_branch(mut self, error: &str) -> Self {
        self.branch_error = Some(error.to_string());
        self
    }

    pub fn failing_commit(mut self, error: &str) -> Self {
        self.commit_error = Some(error.to_string());
        self
    }

    /// Every commit finds nothing staged.
    pub fn without_changes(mut self) -> Self {
        self.no_changes = true;
        self
    }

    pub fn failing_push(mut self, error: &str) -> Self {
        self.push_error = Some(error.to_string());
        self
    }

    /// Pushes succeed but opening the pull request fails.
    pub fn failing_pull_request(mut self, error: &str) -> Self {
        self.pr_error = Some(error.to_string());
        self
    }

    /// Messages of every commit attempt, in order.
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits.lock().clone()
    }

    pub fn push_count(&self) -> usize {
        self.push_count.load(Ordering::SeqCst)
    }

    pub fn pr_count(&self) -> usize {
        self.pr_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceControl for MockSourceControl {
    async fn check_available(&self) -> Result<()> {
        if self.unavailable {
            anyhow::bail!("git: command not found");
        }
        Ok(())
    }

    async fn clone_repo(&self, _url: &str, workspace: &Path) -> Result<PathBuf> {
        if self.hang_clone {
            tokio::time::sleep(HANG).await;
        }
        if let Some(ref error) = self.clone_error {
            anyhow::bail!("Failed to clone repository: {error}");
        }
        let repo = workspace.join("repo");
        tokio::fs::create_dir_all(&repo).await?;
        Ok(repo)
    }

    async fn create_branch(&self, _repo: &Path, _name: &str) -> Result<()> {
        if let Some(ref error) = self.branch_error {
            anyhow::bail!("Failed to create branch: {error}");
        }
        Ok(())
    }

    async fn commit(&self, _repo: &Path, message: &str) -> Result<bool> {
        self.commits.lock().push(message.to_string());
        if let Some(ref error) = self.commit_error {
            anyhow::bail!("Failed to commit: {error}");
        }
        Ok(!self.no_changes)
    }

    async fn push(&self, _repo: &Path, _branch: &str) -> Result<()> {
        self.push_count.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.push_error {
            anyhow::bail!("Failed to push branch: {error}");
        }
        Ok(())
    }

    async fn open_pull_request(
        &self,
        _repo: &Path,
        branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<String> {
        self.pr_count.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.pr_error {
            anyhow::bail!("Failed to create pull request: {error}");
        }
        Ok(format!("https://github.com/acme/widgets/pull/{branch}"))
    }
}

// -----------------------------------------------------------------------------
// Scanner
// -----------------------------------------------------------------------------

/// Mock scanner returning a fixed issue set. Test failures become
/// `LOGIC` issues, one per failure line.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockScanner {
    issues: Arc<Vec<Issue>>,
    scan_error: Option<String>,
    hang_scan: bool,
    scan_count: Arc<AtomicUsize>,
    reanalyze_count: Arc<AtomicUsize>,
}

impl MockScanner {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues: Arc::new(issues),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(mut self, error: &str) -> Self {
        self.scan_error = Some(error.to_string());
        self
    }

    /// Every scan outlasts the step timeout.
    pub fn hanging(mut self) -> Self {
        self.hang_scan = true;
        self
    }

    pub fn scan_count(&self) -> usize {
        self.scan_count.load(Ordering::SeqCst)
    }

    pub fn reanalyze_count(&self) -> usize {
        self.reanalyze_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueScanner for MockScanner {
    async fn scan(&self, _workdir: &Path) -> Result<Vec<Issue>> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        if self.hang_scan {
            tokio::time::sleep(HANG).await;
        }
        if let Some(ref error) = self.scan_error {
            anyhow::bail!("{error}");
        }
        Ok(self.issues.as_ref().clone())
    }

    async fn reanalyze_failures(&self, failures: &[String], _workdir: &Path) -> Result<Vec<Issue>> {
        self.reanalyze_count.fetch_add(1, Ordering::SeqCst);
        Ok(failures.iter().map(|f| Issue::from_test_failure(f)).collect())
    }
}

// -----------------------------------------------------------------------------
// Fixer
// -----------------------------------------------------------------------------

/// A single scripted fix response.
#[derive(Debug, Clone)]
pub(crate) enum MockFix {
    Success,
    Error(String),
    /// Never returns within a test timeout.
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct MockFixer {
    responses: Arc<Vec<MockFix>>,
    propose_count: Arc<AtomicUsize>,
}

impl MockFixer {
    pub fn new(responses: Vec<MockFix>) -> Self {
        Self {
            responses: Arc::new(responses),
            propose_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(vec![MockFix::Success])
    }

    pub fn propose_count(&self) -> usize {
        self.propose_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixProvider for MockFixer {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn propose_fix(&self, issue: &Issue, workdir: &Path) -> Result<FixProposal> {
        let (count, response) = next(&self.responses, &self.propose_count);
        match response {
            MockFix::Success => Ok(FixProposal {
                file: workdir.join(&issue.file),
                fixed_code: None,
                commit_message: format!("Fix {} #{count}", issue.file),
                explanation: String::new(),
            }),
            MockFix::Error(msg) => anyhow::bail!("{msg}"),
            MockFix::Hang => {
                tokio::time::sleep(HANG).await;
                anyhow::bail!("unreachable")
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Test runner
// -----------------------------------------------------------------------------

/// A single scripted test-suite outcome.
#[derive(Debug, Clone)]
pub(crate) enum MockTest {
    Pass,
    Fail(Vec<String>),
    Error(String),
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct MockTestRunner {
    outcomes: Arc<Vec<MockTest>>,
    run_count: Arc<AtomicUsize>,
}

impl MockTestRunner {
    pub fn new(outcomes: Vec<MockTest>) -> Self {
        Self {
            outcomes: Arc::new(outcomes),
            run_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_pass() -> Self {
        Self::new(vec![MockTest::Pass])
    }

    pub fn always_fail() -> Self {
        Self::new(vec![MockTest::Fail(vec!["FAILED test_add".to_string()])])
    }

    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    async fn run_tests(&self, _workdir: &Path) -> Result<TestOutcome> {
        let (_, outcome) = next(&self.outcomes, &self.run_count);
        let duration = Duration::from_millis(5);
        match outcome {
            MockTest::Pass => Ok(TestOutcome::passed(duration)),
            MockTest::Fail(failures) => Ok(TestOutcome::failed(failures.clone(), duration)),
            MockTest::Error(msg) => anyhow::bail!("{msg}"),
            MockTest::Hang => {
                tokio::time::sleep(HANG).await;
                Ok(TestOutcome::passed(HANG))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_test_runner_cycles() {
        let runner = MockTestRunner::new(vec![
            MockTest::Fail(vec!["FAILED a".to_string()]),
            MockTest::Pass,
        ]);
        let dir = Path::new("/tmp");
        assert!(!runner.run_tests(dir).await.unwrap().passed);
        assert!(runner.run_tests(dir).await.unwrap().passed);
        assert!(!runner.run_tests(dir).await.unwrap().passed);
        assert_eq!(runner.run_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_fixer_error() {
        let fixer = MockFixer::new(vec![MockFix::Error("model down".to_string())]);
        let result = fixer.propose_fix(&issue("a.js"), Path::new("/tmp")).await;
        assert!(result.unwrap_err().to_string().contains("model down"));
        assert_eq!(fixer.propose_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_source_control_records_commits() {
        let scm = MockSourceControl::new().without_changes();
        assert!(!scm.commit(Path::new("/tmp"), "msg").await.unwrap());
        assert_eq!(scm.commit_messages(), vec!["msg".to_string()]);
    }
}
