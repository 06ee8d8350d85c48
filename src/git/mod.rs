//! Source control capability used by the run driver.
//!
//! Every operation takes the directory it acts on, so one [`SourceControl`]
//! value can serve any number of concurrent runs.

mod cli;

pub(crate) use cli::GitCli;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Trait for source control backends.
#[async_trait]
pub(crate) trait SourceControl: Send + Sync {
    /// Checks that the backing tool can be invoked at all.
    async fn check_available(&self) -> Result<()>;

    /// Clones `url` under `workspace` and returns the repository directory.
    async fn clone_repo(&self, url: &str, workspace: &Path) -> Result<PathBuf>;

    /// Creates and checks out a new branch.
    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()>;

    /// Stages everything and commits. Returns `false` when there was nothing
    /// to commit.
    async fn commit(&self, repo: &Path, message: &str) -> Result<bool>;

    async fn push(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Opens a pull request and returns its URL (or a URL from which one
    /// can be opened manually).
    async fn open_pull_request(
        &self,
        repo: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String>;
}
