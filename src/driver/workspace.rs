//! Per-run working directory lifecycle.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::registry::RunId;

const DIR_PREFIX: &str = "run_";

/// Name of the working directory for a run.
pub(crate) fn dir_name(run_id: RunId) -> String {
    format!("{DIR_PREFIX}{run_id}")
}

/// Recovers the run identifier from a working directory name.
pub(crate) fn parse_dir_name(name: &str) -> Option<RunId> {
    name.strip_prefix(DIR_PREFIX)?.parse().ok()
}

/// Scoped working directory. Created before clone, removed once the run
/// is finalized unless `keep` is set.
#[derive(Debug)]
pub(crate) struct Workspace {
    path: PathBuf,
    keep: bool,
    released: bool,
}

impl Workspace {
    pub async fn create(root: &Path, run_id: RunId, keep: bool) -> Result<Self> {
        let path = root.join(dir_name(run_id));
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create workspace: {}", path.display()))?;
        debug!("Created workspace {}", path.display());
        Ok(Self {
            path,
            keep,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory (unless kept).
    pub async fn release(mut self) {
        self.released = true;
        if self.keep {
            debug!("Keeping workspace {}", self.path.display());
            return;
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released && !self.keep {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
