//! Fix providers: turn an [`Issue`] into a proposed change.
//!
//! This module provides a unified interface over fix generation backends:
//! - Gemini: asks the model for a full replacement file and commit message
//! - Fallback: deterministic, pattern-based commit messages, no file change
//!
//! The Gemini backend is only used when its API key variable is set; without
//! it every fix goes through the fallback, which is never an error.

mod fallback;
mod gemini;

pub(crate) use fallback::FallbackFixer;
pub(crate) use gemini::GeminiFixer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FixerConfig;
use crate::scanner::Issue;

/// A proposed fix for one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FixProposal {
    /// File the fix applies to, resolved against the working directory.
    pub file: PathBuf,
    /// Complete replacement content, when the provider produced one.
    pub fixed_code: Option<String>,
    /// Short commit message, without the automation prefix.
    pub commit_message: String,
    pub explanation: String,
}

/// Trait for fix generation backends.
#[async_trait]
pub(crate) trait FixProvider: Send + Sync {
    /// Returns the provider name for display.
    fn name(&self) -> &'static str;

    /// Proposes a fix for `issue`. An error means this issue is skipped.
    async fn propose_fix(&self, issue: &Issue, workdir: &Path) -> Result<FixProposal>;

    /// Writes the proposal into the working tree.
    async fn apply_fix(&self, proposal: &FixProposal, _workdir: &Path) -> Result<()> {
        if let Some(ref code) = proposal.fixed_code {
            tokio::fs::write(&proposal.file, code)
                .await
                .with_context(|| format!("Failed to write fix to {}", proposal.file.display()))?;
        }
        Ok(())
    }
}

/// Selects the fix provider for this process.
pub(crate) fn from_config(config: &FixerConfig) -> Arc<dyn FixProvider> {
    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            info!("Using Gemini fix provider (model {})", config.model);
            Arc::new(GeminiFixer::new(config.clone(), key))
        }
        _ => {
            warn!(
                "{} not set, using fallback fixes",
                config.api_key_env
            );
            Arc::new(FallbackFixer::new())
        }
    }
}

/// File contents around an issue, as handed to a fix provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FixContext {
    pub file: PathBuf,
    pub surrounding: String,
    pub full: String,
}

/// Resolves an issue's file against the working directory.
pub(crate) fn resolve_file(issue: &Issue, workdir: &Path) -> PathBuf {
    let path = Path::new(&issue.file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

/// Reads the issue's file and slices `radius` lines either side of it.
pub(crate) async fn read_context(issue: &Issue, workdir: &Path, radius: usize) -> Result<FixContext> {
    let file = resolve_file(issue, workdir);
    let full = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let lines: Vec<&str> = full.split('\n').collect();
    let center = (issue.line as usize).saturating_sub(1);
    let start = center.saturating_sub(radius);
    let end = lines.len().min(center + radius);
    let surrounding = lines.get(start..end).unwrap_or_default().join("\n");

    Ok(FixContext {
        file,
        surrounding,
        full,
    })
}
