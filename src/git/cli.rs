//! `git` and `gh` command-line backend.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tracing::{debug, info, warn};

use super::SourceControl;
use crate::config::GitConfig;

/// Source control through the `git` binary, with pull requests opened by
/// the GitHub CLI.
#[derive(Debug, Clone)]
pub(crate) struct GitCli {
    config: GitConfig,
}

impl GitCli {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }
}

/// A subprocess killed when its future is dropped, so a timed-out or
/// cancelled step leaves nothing running in the workspace.
fn command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true);
    cmd
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<Output> {
    debug!("git {}", args.join(" "));
    command("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))
}

fn stderr_or_stdout(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    }
}

/// Directory name a clone of `url` lands in.
fn repo_name_from_url(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or(url);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// GitHub compare URL for a pushed branch, if the remote is on GitHub.
fn compare_url(remote: &str, branch: &str) -> Option<String> {
    let remote = remote.trim();
    let (_, path) = remote.split_once("github.com")?;
    let path = path.trim_start_matches([':', '/']).trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    Some(format!(
        "https://github.com/{owner}/{repo}/compare/{branch}?expand=1"
    ))
}

#[async_trait]
impl SourceControl for GitCli {
    async fn check_available(&self) -> Result<()> {
        let output = command("git")
            .arg("--version")
            .output()
            .await
            .context("Git is not installed or not accessible")?;
        if !output.status.success() {
            bail!("Git is not installed or not accessible");
        }
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }

    async fn clone_repo(&self, url: &str, workspace: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(workspace)
            .await
            .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

        let repo = workspace.join(repo_name_from_url(url));
        let target = repo.to_string_lossy().to_string();
        let output = run_git(workspace, &["clone", url, &target]).await?;
        if !output.status.success() {
            bail!("Failed to clone repository: {}", stderr_or_stdout(&output));
        }

        for (key, value) in [
            ("user.name", &self.config.user_name),
            ("user.email", &self.config.user_email),
        ] {
            let output = run_git(&repo, &["config", key, value]).await?;
            if !output.status.success() {
                warn!("Failed to set git {}: {}", key, stderr_or_stdout(&output));
            }
        }

        info!("Cloned {} into {}", url, repo.display());
        Ok(repo)
    }

    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()> {
        let output = run_git(repo, &["checkout", "-b", name]).await?;
        if !output.status.success() {
            bail!("Failed to create branch: {}", stderr_or_stdout(&output));
        }
        Ok(())
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<bool> {
        let output = run_git(repo, &["add", "-A"]).await?;
        if !output.status.success() {
            bail!("Failed to stage changes: {}", stderr_or_stdout(&output));
        }

        // Exit 0 means the index matches HEAD.
        let diff = run_git(repo, &["diff", "--cached", "--quiet"]).await?;
        if diff.status.success() {
            debug!("Nothing to commit");
            return Ok(false);
        }

        let message = message.replace(['\r', '\n'], " ");
        let output = run_git(repo, &["commit", "-m", &message]).await?;
        if !output.status.success() {
            bail!("Failed to commit: {}", stderr_or_stdout(&output));
        }
        Ok(true)
    }

    async fn push(&self, repo: &Path, branch: &str) -> Result<()> {
        let output = run_git(repo, &["push", "-u", "origin", branch]).await?;
        if !output.status.success() {
            bail!("Failed to push branch: {}", stderr_or_stdout(&output));
        }
        info!("Pushed {}", branch);
        Ok(())
    }

    async fn open_pull_request(
        &self,
        repo: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String> {
        let pr = command(&self.config.pr_command)
            .current_dir(repo)
            .args([
                "pr",
                "create",
                "--title",
                title,
                "--body",
                body,
                "--base",
                &self.config.base_branch,
                "--head",
                branch,
            ])
            .output()
            .await;

        match pr {
            Ok(output) if output.status.success() => {
                return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
            }
            Ok(output) => debug!("{} pr create failed: {}", self.config.pr_command, stderr_or_stdout(&output)),
            Err(e) => debug!("{} not available: {}", self.config.pr_command, e),
        }

        let output = run_git(repo, &["remote", "get-url", "origin"]).await?;
        let remote = String::from_utf8_lossy(&output.stdout).to_string();
        match compare_url(&remote, branch) {
            Some(url) => Ok(url),
            None => bail!("PR creation pending - manual intervention required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_command_is_killed_when_dropped() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("sleep 1; touch {}", marker.display());

        let mut cmd = command("sh");
        cmd.args(["-c", &script]);
        let timed_out = tokio::time::timeout(Duration::from_millis(100), cmd.output()).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(cwd: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(cwd)
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://github.com/acme/widgets.git"), "widgets");
        assert_eq!(repo_name_from_url("https://github.com/acme/widgets/"), "widgets");
        assert_eq!(repo_name_from_url("git@github.com:acme/widgets.git"), "widgets");
        assert_eq!(repo_name_from_url("/srv/repos/local"), "local");
    }

    #[test]
    fn test_compare_url() {
        assert_eq!(
            compare_url("https://github.com/acme/widgets.git\n", "TEAM_LEAD_AI_Fix").as_deref(),
            Some("https://github.com/acme/widgets/compare/TEAM_LEAD_AI_Fix?expand=1")
        );
        assert_eq!(
            compare_url("git@github.com:acme/widgets.git", "b").as_deref(),
            Some("https://github.com/acme/widgets/compare/b?expand=1")
        );
        assert!(compare_url("https://gitlab.com/acme/widgets.git", "b").is_none());
        assert!(compare_url("", "b").is_none());
    }

    #[tokio::test]
    async fn test_check_available() {
        if !git_available() {
            return;
        }
        assert!(GitCli::new(GitConfig::default()).check_available().await.is_ok());
    }

    #[tokio::test]
    async fn test_clone_branch_and_commit() {
        if !git_available() {
            return;
        }

        let origin = tempdir().unwrap();
        let source = origin.path().join("widgets");
        std::fs::create_dir_all(&source).unwrap();
        git(&source, &["init", "-q"]);
        std::fs::write(source.join("app.js"), "let a = 1\n").unwrap();
        git(&source, &["add", "-A"]);
        git(&source, &["commit", "-q", "-m", "initial"]);

        let workspace = tempdir().unwrap();
        let scm = GitCli::new(GitConfig::default());
        let repo = scm
            .clone_repo(&source.to_string_lossy(), workspace.path())
            .await
            .unwrap();
        assert_eq!(repo, workspace.path().join("widgets"));
        assert!(repo.join("app.js").exists());

        scm.create_branch(&repo, "TEAM_LEAD_AI_Fix").await.unwrap();
        assert!(scm.create_branch(&repo, "TEAM_LEAD_AI_Fix").await.is_err());

        // Clean tree: nothing to commit.
        assert!(!scm.commit(&repo, "[AI-AGENT] noop").await.unwrap());

        std::fs::write(repo.join("app.js"), "let a = 1;\n").unwrap();
        assert!(scm.commit(&repo, "[AI-AGENT] Add missing semicolon").await.unwrap());

        let log = Command::new("git")
            .current_dir(&repo)
            .args(["log", "-1", "--pretty=%s"])
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&log.stdout).trim(),
            "[AI-AGENT] Add missing semicolon"
        );
    }

    #[tokio::test]
    async fn test_clone_failure_reports_error() {
        if !git_available() {
            return;
        }
        let workspace = tempdir().unwrap();
        let missing = workspace.path().join("does-not-exist");
        let result = GitCli::new(GitConfig::default())
            .clone_repo(&missing.to_string_lossy(), workspace.path())
            .await;
        assert!(result.unwrap_err().to_string().contains("Failed to clone repository"));
    }
}
