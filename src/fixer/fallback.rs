//! Deterministic fix provider used when no model is configured.
//!
//! Produces a commit message from the issue's bug type and description and
//! leaves the file untouched.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{read_context, FixProposal, FixProvider};
use crate::registry::BugType;
use crate::scanner::Issue;

/// Pattern-based fix provider.
#[derive(Debug, Clone, Default)]
pub(crate) struct FallbackFixer;

impl FallbackFixer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FixProvider for FallbackFixer {
    fn name(&self) -> &'static str {
        "Fallback"
    }

    async fn propose_fix(&self, issue: &Issue, workdir: &Path) -> Result<FixProposal> {
        // The file must still be readable for the issue to be actionable.
        let context = read_context(issue, workdir, 0).await?;
        Ok(fallback_proposal(issue, context.file))
    }
}

/// Builds the pattern-based proposal for an issue.
pub(crate) fn fallback_proposal(issue: &Issue, file: PathBuf) -> FixProposal {
    FixProposal {
        file,
        fixed_code: None,
        commit_message: fallback_commit_message(issue),
        explanation: format!("Applied automated fix for {}", issue.bug_type),
    }
}

fn fallback_commit_message(issue: &Issue) -> String {
    let description = issue.description.to_lowercase();
    match issue.bug_type {
        BugType::Syntax if description.contains("missing semicolon") => {
            "Add missing semicolon".to_string()
        }
        BugType::Syntax if description.contains("missing colon") => "Add missing colon".to_string(),
        BugType::Syntax => format!("Fix syntax error at line {}", issue.line),
        BugType::Linting if description.contains("unused") => "Remove unused variable".to_string(),
        BugType::Linting => "Fix linting issue".to_string(),
        BugType::Import => "Fix import path".to_string(),
        BugType::TypeError => "Fix type error".to_string(),
        other => format!("Fix {other} issue"),
    }
}
