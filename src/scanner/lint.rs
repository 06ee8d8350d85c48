//! Linter-backed issue scanner.
//!
//! Runs `pylint` and `eslint` with JSON output when they are installed, then
//! walks the tree for a handful of generic pattern checks. A missing linter
//! is not an error; its findings are simply absent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Issue, IssueScanner};
use crate::registry::{BugType, Severity};

/// Directories never descended into by the generic walk.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", "venv"];

/// Source extensions the generic walk looks at.
const SOURCE_EXTENSIONS: &[&str] = &["py", "js", "ts", "jsx", "tsx", "java", "go", "rs"];

/// Scanner combining linter output with generic pattern checks.
#[derive(Debug, Clone, Default)]
pub(crate) struct LintScanner;

impl LintScanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IssueScanner for LintScanner {
    async fn scan(&self, workdir: &Path) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();

        if let Some(stdout) =
            run_tool(workdir, "pylint", &["--output-format=json", "--recursive=y", "."]).await
        {
            issues.extend(parse_pylint_output(&stdout, workdir));
        }

        if let Some(stdout) = run_tool(workdir, "eslint", &["--format", "json", "."]).await {
            issues.extend(parse_eslint_output(&stdout));
        }

        let root = workdir.to_path_buf();
        let generic = tokio::task::spawn_blocking(move || scan_tree(&root))
            .await
            .context("Generic scan task panicked")??;
        issues.extend(generic);

        info!("Scan found {} issues in {}", issues.len(), workdir.display());
        Ok(issues)
    }

    async fn reanalyze_failures(&self, failures: &[String], _workdir: &Path) -> Result<Vec<Issue>> {
        Ok(failures
            .iter()
            .map(|failure| Issue::from_test_failure(failure))
            .collect())
    }
}

/// Runs a linter and returns its stdout, or `None` if it could not be spawned.
///
/// Linters exit non-zero when they report findings, so the exit status is
/// ignored.
async fn run_tool(workdir: &Path, program: &str, args: &[&str]) -> Option<String> {
    match tokio::process::Command::new(program)
        .current_dir(workdir)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if stdout.trim().is_empty() {
                None
            } else {
                Some(stdout)
            }
        }
        Err(e) => {
            debug!("{} not available: {}", program, e);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct PylintMessage {
    #[serde(default)]
    path: String,
    #[serde(default)]
    line: u32,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFile {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    #[serde(default)]
    line: u32,
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: u8,
}

/// Parses `pylint --output-format=json` output. Unparseable output yields nothing.
fn parse_pylint_output(stdout: &str, workdir: &Path) -> Vec<Issue> {
    let messages: Vec<PylintMessage> = match serde_json::from_str(stdout) {
        Ok(messages) => messages,
        Err(e) => {
            debug!("Ignoring unparseable pylint output: {}", e);
            return Vec::new();
        }
    };

    messages
        .into_iter()
        .map(|msg| Issue {
            file: workdir.join(&msg.path).display().to_string(),
            line: msg.line,
            bug_type: map_pylint_type(&msg.kind),
            description: msg.message,
            severity: map_pylint_severity(&msg.kind),
        })
        .collect()
}

/// Parses `eslint --format json` output. Unparseable output yields nothing.
fn parse_eslint_output(stdout: &str) -> Vec<Issue> {
    let files: Vec<EslintFile> = match serde_json::from_str(stdout) {
        Ok(files) => files,
        Err(e) => {
            debug!("Ignoring unparseable eslint output: {}", e);
            return Vec::new();
        }
    };

    files
        .into_iter()
        .flat_map(|file| {
            let path = file.file_path;
            file.messages.into_iter().map(move |msg| Issue {
                file: path.clone(),
                line: msg.line,
                bug_type: map_eslint_rule(msg.rule_id.as_deref()),
                description: msg.message,
                severity: map_eslint_severity(msg.severity),
            })
        })
        .collect()
}

fn map_pylint_type(kind: &str) -> BugType {
    match kind {
        "error" | "fatal" => BugType::Syntax,
        _ => BugType::Linting,
    }
}

fn map_pylint_severity(kind: &str) -> Severity {
    match kind.to_lowercase().as_str() {
        "convention" | "refactor" => Severity::Low,
        "error" => Severity::High,
        "fatal" => Severity::Critical,
        _ => Severity::Medium,
    }
}

fn map_eslint_rule(rule_id: Option<&str>) -> BugType {
    match rule_id {
        Some(rule) if rule.contains("import") => BugType::Import,
        Some(rule) if rule.contains("type") => BugType::TypeError,
        Some(rule) if rule.contains("syntax") => BugType::Syntax,
        _ => BugType::Linting,
    }
}

fn map_eslint_severity(severity: u8) -> Severity {
    match severity {
        0 => Severity::Low,
        1 => Severity::Medium,
        _ => Severity::High,
    }
}

/// Walks the tree and applies the generic per-file checks.
fn scan_tree(root: &Path) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_ref()) {
                    pending.push(path);
                }
                continue;
            }

            let is_source = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
            if !is_source {
                continue;
            }

            match std::fs::read_to_string(&path) {
                Ok(content) => issues.extend(check_source(&path, &content)),
                Err(e) => debug!("Skipping unreadable file {}: {}", path.display(), e),
            }
        }
    }

    Ok(issues)
}

/// Pattern checks for a single source file.
fn check_source(path: &Path, content: &str) -> Vec<Issue> {
    let is_js = path.extension().and_then(|ext| ext.to_str()) == Some("js");
    if !is_js {
        return Vec::new();
    }

    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.trim();
            let terminated = trimmed.ends_with([';', '{', '}', ',']);
            if trimmed.is_empty() || trimmed.starts_with("//") || terminated {
                return None;
            }
            Some(Issue {
                file: path.display().to_string(),
                line: u32::try_from(idx + 1).unwrap_or(u32::MAX),
                bug_type: BugType::Syntax,
                description: "Possible missing semicolon".to_string(),
                severity: Severity::Low,
            })
        })
        .collect()
}
