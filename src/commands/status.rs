use anyhow::{Context, Result};
use colored::Colorize;

use super::format::format_result;
use crate::config::Config;
use crate::registry::{RunId, SnapshotStore};

/// Prints the persisted result of a finalized run.
pub async fn run(config: &Config, run_id: &str) -> Result<()> {
    let parsed: RunId = run_id
        .parse()
        .with_context(|| format!("Invalid run id: {run_id}"))?;

    let store = SnapshotStore::new(config.results.dir.clone());
    match store.load(parsed).await? {
        Some(result) => print!("{}", format_result(&result)),
        None => {
            println!("\n{} No results found for run {}.", "ℹ".blue(), run_id);
            println!(
                "  Snapshots are read from {}",
                store.dir().display().to_string().dimmed()
            );
            anyhow::bail!("Run not found: {run_id}");
        }
    }
    Ok(())
}
