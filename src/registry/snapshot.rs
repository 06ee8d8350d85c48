use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::model::{RunId, RunResult};

const SNAPSHOT_PREFIX: &str = "results_";
const SNAPSHOT_EXT: &str = "json";

/// Durable store for finalized run snapshots, one JSON file per run.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for a run
    pub fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{run_id}.{SNAPSHOT_EXT}"))
    }

    /// Save a snapshot, replacing any previous file atomically
    pub async fn save(&self, result: &RunResult) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let path = self.path_for(result.run_id);
        let tmp = path.with_extension("json.tmp");

        let content =
            serde_json::to_string_pretty(result).context("Failed to serialize run snapshot")?;

        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into place: {}", path.display()))?;

        Ok(path)
    }

    /// Load a snapshot if one was persisted for this run
    pub async fn load(&self, run_id: RunId) -> Result<Option<RunResult>> {
        let path = self.path_for(run_id);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        let result: RunResult = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;

        Ok(Some(result))
    }

    /// List snapshot files currently present in the store directory
    pub fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read directory: {}", self.dir.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_snapshot_file(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(stem) = name
        .strip_prefix(SNAPSHOT_PREFIX)
        .and_then(|rest| rest.strip_suffix(".json"))
    else {
        return false;
    };
    stem.parse::<RunId>().is_ok()
}
