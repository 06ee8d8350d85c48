//! Remove leftover run workspaces and, optionally, result snapshots.
//!
//! Core logic selects paths by name and removes them through an injected
//! remover. Formatting is pure. IO happens only at the top level.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::driver::parse_dir_name;
use crate::registry::SnapshotStore;

/// Keeps the paths whose file name is a run workspace directory name.
pub fn workspace_dirs<I>(entries: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut dirs: Vec<PathBuf> = entries
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_dir_name)
                .is_some()
        })
        .collect();
    dirs.sort();
    dirs
}

/// Remove paths and return the list of removed paths
pub fn clean_paths<R>(paths: Vec<PathBuf>, mut remove: R) -> Result<Vec<PathBuf>>
where
    R: FnMut(&Path) -> Result<()>,
{
    let mut removed = Vec::new();
    for path in paths {
        remove(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

/// Format the clean results as a displayable string
pub fn format_results(removed: &[PathBuf]) -> String {
    let mut out = String::new();
    if removed.is_empty() {
        let _ = writeln!(out, "\n{} Nothing to clean.", "ℹ".blue());
    } else {
        let _ = writeln!(out, "\n{} Cleaned:", "✓".green());
        for path in removed {
            let _ = writeln!(out, "  {} {}", "✗".red(), path.display().to_string().dimmed());
        }
    }
    out
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    Ok(entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect())
}

/// Entry point: sweeps the configured directories.
///
/// Workspaces of runs still active in another process are removed too.
pub async fn run(config: &Config, results: bool) -> Result<()> {
    let mut targets = workspace_dirs(list_dir(&config.workspace.root)?);
    if results {
        targets.extend(SnapshotStore::new(config.results.dir.clone()).snapshot_files()?);
    }

    let removed = clean_paths(targets, |path| {
        let outcome = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        outcome.with_context(|| format!("Failed to remove {}", path.display()))
    })?;

    print!("{}", format_results(&removed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::dir_name;
    use crate::registry::RunId;
    use std::cell::RefCell;

    #[test]
    fn test_workspace_dirs_filters_by_name() {
        let run = PathBuf::from("/tmp").join(dir_name(RunId::new()));
        let entries = vec![
            run.clone(),
            PathBuf::from("/tmp/run_not-a-uuid"),
            PathBuf::from("/tmp/other"),
        ];
        assert_eq!(workspace_dirs(entries), vec![run]);
    }

    #[test]
    fn test_clean_paths_removes_each() {
        let removed_paths = RefCell::new(Vec::new());
        let removed = clean_paths(vec![PathBuf::from("a"), PathBuf::from("b")], |p| {
            removed_paths.borrow_mut().push(p.to_path_buf());
            Ok(())
        })
        .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed_paths.borrow().len(), 2);
    }

    #[test]
    fn test_clean_paths_stops_on_error() {
        let result = clean_paths(vec![PathBuf::from("a")], |_| anyhow::bail!("denied"));
        assert!(result.is_err());
    }

    #[test]
    fn test_format_results() {
        assert!(format_results(&[]).contains("Nothing to clean"));
        let out = format_results(&[PathBuf::from("/tmp/run_x")]);
        assert!(out.contains("Cleaned"));
        assert!(out.contains("/tmp/run_x"));
    }

    #[tokio::test]
    async fn test_run_sweeps_workspaces_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.workspace.root = dir.path().join("work");
        config.results.dir = dir.path().join("results");

        let run_id = RunId::new();
        let workspace = config.workspace.root.join(dir_name(run_id));
        let unrelated = config.workspace.root.join("keep-me");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(&unrelated).unwrap();

        let store = SnapshotStore::new(config.results.dir.clone());
        fs::create_dir_all(store.dir()).unwrap();
        let snapshot = store.path_for(run_id);
        fs::write(&snapshot, "{}").unwrap();

        run(&config, false).await.unwrap();
        assert!(!workspace.exists());
        assert!(unrelated.exists());
        assert!(snapshot.exists());

        run(&config, true).await.unwrap();
        assert!(!snapshot.exists());
    }
}
